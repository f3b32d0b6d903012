//! Dual-sink dispatch of validated events.
//!
//! For each event the [`Dispatcher`] invokes the queue and store sinks
//! concurrently, joins both outcomes, and records the event's final
//! [`Disposition`]. A failure in one sink never blocks or rolls back the
//! other, and no error here ever stops the pipeline: the caller always
//! proceeds to the next event.
//!
//! # Retry policy
//!
//! Transient failures are retried with bounded exponential backoff, scoped
//! to the failing sink; permanent failures are not retried.

use crate::backoff::Backoff;
use crate::event::MetagameEvent;
use crate::metrics::PipelineMetrics;
use crate::sinks::{EventSink, SinkError, SinkKind, SinkOutcome};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retry settings for one sink delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per sink, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Final per-event delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Both sinks acknowledged the event.
    Fully,
    /// Exactly one sink acknowledged; the other exhausted its attempts.
    Partial { failed: SinkKind },
    /// Neither sink acknowledged the event.
    Undelivered,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fully => f.write_str("fully delivered"),
            Self::Partial { failed } => write!(f, "partially delivered ({failed} failed)"),
            Self::Undelivered => f.write_str("undelivered"),
        }
    }
}

/// Drives delivery of one event at a time to both sinks.
pub struct Dispatcher {
    queue: Arc<dyn EventSink>,
    store: Arc<dyn EventSink>,
    policy: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn EventSink>,
        store: Arc<dyn EventSink>,
        policy: RetryPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            queue,
            store,
            policy,
            metrics,
        }
    }

    /// Deliver one event to both sinks and record its disposition.
    ///
    /// The two sink deliveries run concurrently and are joined before this
    /// returns, bounding in-flight work to one event. Per-event, the two
    /// deliveries have no defined relative completion order.
    pub async fn dispatch(&self, event: &MetagameEvent) -> Disposition {
        let (queue_result, store_result) = tokio::join!(
            self.deliver_with_retry(self.queue.as_ref(), event),
            self.deliver_with_retry(self.store.as_ref(), event),
        );

        let disposition = match (&queue_result, &store_result) {
            (Ok(()), Ok(())) => Disposition::Fully,
            (Err(_), Ok(())) => Disposition::Partial {
                failed: SinkKind::Queue,
            },
            (Ok(()), Err(_)) => Disposition::Partial {
                failed: SinkKind::Store,
            },
            (Err(_), Err(_)) => Disposition::Undelivered,
        };

        match disposition {
            Disposition::Fully => {
                info!(id = %event.id, state = %event.state, "event fully delivered");
            }
            Disposition::Partial { failed } => {
                let error = match failed {
                    SinkKind::Queue => queue_result.unwrap_err(),
                    SinkKind::Store => store_result.unwrap_err(),
                };
                warn!(
                    id = %event.id,
                    failed_sink = %failed,
                    error = %error,
                    "event partially delivered"
                );
            }
            Disposition::Undelivered => {
                warn!(
                    id = %event.id,
                    queue_error = %queue_result.unwrap_err(),
                    store_error = %store_result.unwrap_err(),
                    "event undelivered, both sinks failed"
                );
            }
        }

        self.metrics.record_disposition(disposition);
        disposition
    }

    /// Attempt delivery to one sink under the retry policy.
    async fn deliver_with_retry(
        &self,
        sink: &dyn EventSink,
        event: &MetagameEvent,
    ) -> Result<(), SinkError> {
        let mut backoff = Backoff::new(self.policy.base_delay, self.policy.max_delay);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match sink.deliver(event).await {
                SinkOutcome::Delivered => return Ok(()),
                SinkOutcome::Permanent(e) => {
                    debug!(
                        id = %event.id,
                        sink = %sink.kind(),
                        error = %e,
                        "permanent sink failure, not retrying"
                    );
                    return Err(e);
                }
                SinkOutcome::Transient(e) => {
                    if attempt >= self.policy.max_attempts {
                        debug!(
                            id = %event.id,
                            sink = %sink.kind(),
                            attempts = attempt,
                            "retry attempts exhausted"
                        );
                        return Err(e);
                    }
                    let delay = backoff.next_delay();
                    debug!(
                        id = %event.id,
                        sink = %sink.kind(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient sink failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
