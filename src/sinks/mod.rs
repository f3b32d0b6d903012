//! Delivery sinks for validated events.
//!
//! The [`EventSink`] trait is the seam between the dispatcher and the two
//! concrete sinks, so tests can substitute fakes.
//!
//! ## Built-in Sinks
//!
//! - [`QueuePublisher`]: XADD to a Redis Stream (the warpgate message queue)
//! - [`StorePersister`]: insert into a MongoDB collection (historical record)

pub mod queue;
pub mod store;

use crate::event::MetagameEvent;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use queue::QueuePublisher;
pub use store::StorePersister;

/// Identity of a sink, used in dispositions and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Queue,
    Store,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => f.write_str("queue"),
            Self::Store => f.write_str("store"),
        }
    }
}

/// Errors produced by a delivery attempt.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's connection could not be established or was lost
    #[error("connection unavailable: {0}")]
    Connection(String),

    /// No acknowledgement within the sink's timeout
    #[error("delivery timed out after {0}ms")]
    Timeout(u64),

    /// The remote rejected the write
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The event could not be serialized for this sink
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Per-attempt result of delivering one event to one sink.
///
/// Created by a sink per attempt, consumed immediately by the dispatcher,
/// never persisted.
#[derive(Debug)]
pub enum SinkOutcome {
    /// The sink acknowledged the event.
    Delivered,
    /// The attempt failed but a retry may succeed (unavailability, timeout).
    Transient(SinkError),
    /// The attempt failed and retrying would fail identically.
    Permanent(SinkError),
}

/// One delivery target for validated events.
///
/// # Thread Safety
///
/// Sinks must be `Send + Sync`; the dispatcher invokes both sinks
/// concurrently from the same task.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Which sink this is, for dispositions and logs.
    fn kind(&self) -> SinkKind;

    /// Attempt to deliver one event. Never panics; failures are expressed
    /// in the returned [`SinkOutcome`].
    async fn deliver(&self, event: &MetagameEvent) -> SinkOutcome;
}
