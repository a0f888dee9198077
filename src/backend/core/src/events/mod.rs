//! Append-only event log.
//!
//! - **`event`**: the [`StaffXEvent`] row, the [`EventType`] enum, and the
//!   query filter types.
//! - **`log`**: the [`EventLog`] service: publish, cursor-paginated query,
//!   and the broadcast push stream.
//!
//! Every mutating operation in the core publishes one or more events; the
//! log is the only surface external consumers (UI, pollers) observe state
//! transitions through. Rows are immutable and totally ordered by
//! `(occurred_at, id)` across all aggregates.

mod event;
mod log;

pub use event::{EventFilter, EventPosition, EventType, NewEvent, StaffXEvent};
pub use log::{EventLog, EventPage, EventQuery};
