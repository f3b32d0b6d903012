//! # Warpgate ESS
//!
//! A PlanetSide 2 ESS (Event Streaming Service) client for the warpgate
//! stack. Holds a live subscription to the Census push websocket, filters
//! for `MetagameEvent` (continent alerts), validates each event, and fans
//! it out to a Redis Stream and a MongoDB collection with at-least-once
//! delivery to both.
//!
//! ## Architecture
//!
//! ```text
//! Census push ws -> StreamSubscriber -> EventValidator -> Dispatcher
//!                                                          ├─ QueuePublisher (Redis Stream)
//!                                                          └─ StorePersister (MongoDB)
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Census frame classification and the validated event type
//! - [`validate`]: Raw payload validation into [`event::MetagameEvent`]
//! - [`subscriber`]: Websocket subscription with reconnect state machine
//! - [`dispatch`]: Dual-sink delivery with per-sink retry
//! - [`sinks`]: The [`sinks::EventSink`] trait and both sink implementations

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod metrics;
pub mod shutdown;
pub mod sinks;
pub mod subscriber;
pub mod validate;

// Re-export commonly used types at crate root
pub use dispatch::{Dispatcher, Disposition, RetryPolicy};
pub use event::{EventId, MetagameEvent, MetagameState, RawMessage, StreamMessage};
pub use sinks::{EventSink, SinkError, SinkKind, SinkOutcome};
pub use subscriber::{StreamSubscriber, SubscriptionState};
pub use validate::{EventValidator, Rejection};

/// The single Census event kind this pipeline acts upon.
pub const MONITORED_EVENT: &str = "MetagameEvent";

/// Default Redis stream name for published alerts
pub const ALERT_STREAM_NAME: &str = "warpgate:alerts";
