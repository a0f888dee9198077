//! The event log service: publish, query, subscribe.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::instrument;
use uuid::Uuid;

use crate::config::EventsConfig;
use crate::error::{ErrorCode, Result, StaffError};
use crate::pagination::EventCursor;
use crate::store::Backend;

use super::{EventFilter, EventPosition, NewEvent, StaffXEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// Query & Page Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller-facing query parameters.
///
/// `since` accepts either a previously issued cursor token or a raw RFC-3339
/// timestamp; anything else is rejected as an invalid cursor.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub org_id: Option<Uuid>,
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<Uuid>,
    pub since: Option<String>,
    pub limit: Option<i64>,
}

/// One page of events plus the token to resume from.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<StaffXEvent>,
    /// Present iff more events exist past this page; encodes the position of
    /// the last event actually returned.
    pub next_cursor: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Log
// ═══════════════════════════════════════════════════════════════════════════════

/// Service facade for the append-only event log.
#[derive(Clone)]
pub struct EventLog {
    backend: Arc<dyn Backend>,
    sender: broadcast::Sender<StaffXEvent>,
    config: EventsConfig,
}

impl EventLog {
    pub fn new(backend: Arc<dyn Backend>, config: EventsConfig) -> Self {
        let (sender, _) = broadcast::channel(config.stream_capacity);
        Self {
            backend,
            sender,
            config,
        }
    }

    /// Append one immutable event and fan it out to live subscribers.
    ///
    /// The append commits before the broadcast, so a poller that resumes
    /// from a cursor can never observe the push copy without the row.
    #[instrument(skip(self, new), fields(event_type = %new.event_type, aggregate = %new.aggregate_type))]
    pub async fn publish(&self, new: NewEvent) -> Result<StaffXEvent> {
        let event = self.backend.append_event(new).await?;

        counter!(
            "staffx_events_published_total",
            "type" => event.event_type.as_str(),
        )
        .increment(1);

        // Lagging or absent subscribers are fine; polling is the fallback.
        let _ = self.sender.send(event.clone());

        tracing::debug!(event_id = event.id, event_type = %event.event_type, "Event published");
        Ok(event)
    }

    /// Query events with conjunctive filters and cursor pagination.
    ///
    /// Fetches `limit + 1` rows to decide whether a `next_cursor` exists; the
    /// emitted cursor always encodes the last row actually returned, so
    /// resuming never re-returns or skips an event.
    pub async fn query(&self, query: EventQuery) -> Result<EventPage> {
        let limit = query
            .limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size);

        let since = query.since.as_deref().map(parse_since).transpose()?;

        let filter = EventFilter {
            org_id: query.org_id,
            aggregate_type: query.aggregate_type,
            aggregate_id: query.aggregate_id,
            since,
            limit: limit + 1,
        };

        let mut events = self.backend.query_events(&filter).await?;

        let has_more = events.len() as i64 > limit;
        if has_more {
            events.truncate(limit as usize);
        }

        let next_cursor = if has_more {
            // Cursor from the last returned row, not the overfetched one.
            let last = events.last().expect("non-empty page when has_more");
            Some(EventCursor::from_event(last).encode()?)
        } else {
            None
        };

        Ok(EventPage {
            events,
            next_cursor,
        })
    }

    /// Subscribe to the live push stream.
    ///
    /// The stream starts at subscription time; consumers needing history
    /// first drain a cursor query, then switch to the stream, falling back
    /// to polling if the stream lags or errors.
    pub fn subscribe(&self) -> BroadcastStream<StaffXEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of live push-stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Parse a `since` parameter: cursor token first, raw timestamp fallback.
fn parse_since(raw: &str) -> Result<EventPosition> {
    if let Ok(cursor) = EventCursor::decode(raw) {
        return Ok(EventPosition::Cursor {
            occurred_at: cursor.occurred_at,
            id: cursor.id,
        });
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(EventPosition::Timestamp(ts.with_timezone(&Utc)));
    }

    Err(StaffError::new(
        ErrorCode::InvalidCursor,
        "since must be a cursor token or an RFC-3339 timestamp",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since_accepts_timestamp() {
        let position = parse_since("2024-03-01T12:00:00Z").unwrap();
        assert!(matches!(position, EventPosition::Timestamp(_)));
    }

    #[test]
    fn test_parse_since_accepts_cursor() {
        let token = EventCursor::new(Utc::now(), 9).encode().unwrap();
        let position = parse_since(&token).unwrap();
        match position {
            EventPosition::Cursor { id, .. } => assert_eq!(id, 9),
            other => panic!("expected cursor position, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_since_rejects_garbage() {
        let err = parse_since("yesterday-ish").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCursor);
    }
}
