//! Outreach event store
//!
//! Event types shared by the tracker and its collaborators, plus the capped
//! local queue that serves as the durable fallback sink.

pub mod event;
pub mod queue;

pub use event::{OutreachEvent, OutreachKind, OutreachStatus, MANUAL_DM_NAME, MANUAL_DM_URL};
pub use queue::{EventQueue, QueueStats, StoreError, DEFAULT_CAPACITY};
