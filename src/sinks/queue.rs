//! Queue sink - publishes alerts to a Redis Stream.
//!
//! Each validated event becomes one `XADD` to the configured stream; the
//! stream id Redis returns is the broker acknowledgement. Downstream
//! warpgate services consume the stream through consumer groups.
//!
//! Publishing is not deduplicated: the same event published twice yields
//! two stream entries. Consumers dedup on the `id` field if they need to.

use super::{EventSink, SinkError, SinkKind, SinkOutcome};
use crate::config::QueueConfig;
use crate::event::MetagameEvent;
use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use std::time::Duration;
use tracing::{debug, warn};

/// Publishes validated events to a Redis Stream.
///
/// The pool connects lazily on first use. A failed publish is retried once
/// on a fresh pooled connection before reporting a transient failure;
/// broker unavailability is always transient, never permanent.
pub struct QueuePublisher {
    pool: Pool,
    stream: String,
    max_len: Option<usize>,
    timeout: Duration,
}

impl QueuePublisher {
    pub fn new(pool: Pool, config: &QueueConfig) -> Self {
        Self {
            pool,
            stream: config.stream.clone(),
            max_len: config.max_len,
            timeout: Duration::from_millis(config.publish_timeout_ms),
        }
    }

    /// Publish one event, awaiting the broker acknowledgement.
    pub async fn publish(&self, event: &MetagameEvent) -> SinkOutcome {
        match self.try_publish(event).await {
            Ok(id) => {
                debug!(id = %event.id, stream_id = %id, "event published to stream");
                SinkOutcome::Delivered
            }
            Err(first) => {
                // One reconnect attempt on a fresh pooled connection before
                // giving the dispatcher a say.
                debug!(id = %event.id, error = %first, "publish failed, retrying once");
                match self.try_publish(event).await {
                    Ok(id) => {
                        debug!(id = %event.id, stream_id = %id, "publish retry succeeded");
                        SinkOutcome::Delivered
                    }
                    Err(e) => {
                        warn!(id = %event.id, error = %e, "publish failed after reconnect");
                        SinkOutcome::Transient(e)
                    }
                }
            }
        }
    }

    async fn try_publish(&self, event: &MetagameEvent) -> Result<String, SinkError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        let mut xadd = cmd("XADD");
        xadd.arg(&self.stream);
        if let Some(max_len) = self.max_len {
            xadd.arg("MAXLEN").arg("~").arg(max_len);
        }
        xadd.arg("*");
        for (field, value) in stream_fields(event) {
            xadd.arg(field).arg(value);
        }

        match tokio::time::timeout(self.timeout, xadd.query_async::<String>(&mut conn)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(SinkError::Connection(e.to_string())),
            Err(_) => Err(SinkError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl EventSink for QueuePublisher {
    fn kind(&self) -> SinkKind {
        SinkKind::Queue
    }

    async fn deliver(&self, event: &MetagameEvent) -> SinkOutcome {
        self.publish(event).await
    }
}

/// Flat field/value pairs for the stream entry.
fn stream_fields(event: &MetagameEvent) -> Vec<(&'static str, String)> {
    vec![
        ("id", event.id.to_string()),
        ("event_id", event.event_id.to_string()),
        ("state", event.state.name().to_string()),
        ("world_id", event.world_id.to_string()),
        ("zone_id", event.zone_id.to_string()),
        ("instance_id", event.instance_id.to_string()),
        ("nc", event.nc.to_string()),
        ("tr", event.tr.to_string()),
        ("vs", event.vs.to_string()),
        ("xp", event.xp.to_string()),
        ("timestamp", event.timestamp.to_string()),
        ("received_at", event.received_at.to_rfc3339()),
    ]
}
