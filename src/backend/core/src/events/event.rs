//! Event rows and query filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Event Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle transitions observable through the event log.
///
/// Wire names are dotted, stable strings; clients match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "project.created")]
    ProjectCreated,
    #[serde(rename = "thread.created")]
    ThreadCreated,
    #[serde(rename = "thread.updated")]
    ThreadUpdated,
    #[serde(rename = "thread.matrix.changed")]
    ThreadMatrixChanged,
    #[serde(rename = "chat.message.appended")]
    ChatMessageAppended,
    #[serde(rename = "chat.session.finished")]
    ChatSessionFinished,
    #[serde(rename = "assistant.run.started")]
    RunStarted,
    #[serde(rename = "assistant.run.waiting_input")]
    RunWaitingInput,
    #[serde(rename = "assistant.run.progress")]
    RunProgress,
    #[serde(rename = "assistant.run.completed")]
    RunCompleted,
    #[serde(rename = "assistant.run.failed")]
    RunFailed,
    #[serde(rename = "assistant.run.cancelled")]
    RunCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "project.created",
            Self::ThreadCreated => "thread.created",
            Self::ThreadUpdated => "thread.updated",
            Self::ThreadMatrixChanged => "thread.matrix.changed",
            Self::ChatMessageAppended => "chat.message.appended",
            Self::ChatSessionFinished => "chat.session.finished",
            Self::RunStarted => "assistant.run.started",
            Self::RunWaitingInput => "assistant.run.waiting_input",
            Self::RunProgress => "assistant.run.progress",
            Self::RunCompleted => "assistant.run.completed",
            Self::RunFailed => "assistant.run.failed",
            Self::RunCancelled => "assistant.run.cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project.created" => Some(Self::ProjectCreated),
            "thread.created" => Some(Self::ThreadCreated),
            "thread.updated" => Some(Self::ThreadUpdated),
            "thread.matrix.changed" => Some(Self::ThreadMatrixChanged),
            "chat.message.appended" => Some(Self::ChatMessageAppended),
            "chat.session.finished" => Some(Self::ChatSessionFinished),
            "assistant.run.started" => Some(Self::RunStarted),
            "assistant.run.waiting_input" => Some(Self::RunWaitingInput),
            "assistant.run.progress" => Some(Self::RunProgress),
            "assistant.run.completed" => Some(Self::RunCompleted),
            "assistant.run.failed" => Some(Self::RunFailed),
            "assistant.run.cancelled" => Some(Self::RunCancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Rows
// ═══════════════════════════════════════════════════════════════════════════════

/// One immutable fact in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffXEvent {
    /// Server-assigned, monotonically increasing; the ordering tiebreak.
    pub id: i64,
    pub event_type: EventType,
    /// Aggregate the event belongs to ("thread", "run", "project").
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub org_id: Uuid,
    pub trace_id: Option<String>,
    pub payload: serde_json::Value,
    pub version: i32,
    pub occurred_at: DateTime<Utc>,
}

/// Input for appending an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub org_id: Uuid,
    pub trace_id: Option<String>,
    pub payload: serde_json::Value,
    pub version: i32,
}

impl NewEvent {
    pub fn new(
        event_type: EventType,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        org_id: Uuid,
    ) -> Self {
        Self {
            event_type,
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            org_id,
            trace_id: None,
            payload: serde_json::Value::Null,
            version: 0,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Query Filters
// ═══════════════════════════════════════════════════════════════════════════════

/// Exclusive lower bound for an event query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPosition {
    /// Strict position from a previously issued cursor: events after
    /// `(occurred_at, id)` in the total order.
    Cursor {
        occurred_at: DateTime<Utc>,
        id: i64,
    },
    /// Coarser raw-timestamp bound on `occurred_at` only.
    Timestamp(DateTime<Utc>),
}

/// Conjunctive filter set, resolved by the backend.
///
/// `limit` is the row count to fetch; the [`crate::events::EventLog`]
/// overfetches by one to decide whether a next cursor exists.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub org_id: Option<Uuid>,
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<Uuid>,
    pub since: Option<EventPosition>,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for ty in [
            EventType::ProjectCreated,
            EventType::ThreadCreated,
            EventType::ThreadUpdated,
            EventType::ThreadMatrixChanged,
            EventType::ChatMessageAppended,
            EventType::ChatSessionFinished,
            EventType::RunStarted,
            EventType::RunWaitingInput,
            EventType::RunProgress,
            EventType::RunCompleted,
            EventType::RunFailed,
            EventType::RunCancelled,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn test_event_type_serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::RunWaitingInput).unwrap();
        assert_eq!(json, "\"assistant.run.waiting_input\"");
        let parsed: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EventType::RunWaitingInput);
    }
}
