//! Cursor-based pagination for the event log.

mod cursor;

pub use cursor::EventCursor;
