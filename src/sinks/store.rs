//! Store sink - persists alerts as MongoDB documents.
//!
//! Each validated event becomes one `insert_one` into the configured
//! collection; the inserted id is the write acknowledgement. The document
//! carries no `_id`, so the server assigns an ObjectId and a retried insert
//! after a client-side timeout creates a duplicate document rather than a
//! duplicate-key error. That is the accepted at-least-once trade-off;
//! `event_key` is stored as a plain field for downstream correlation.

use super::{EventSink, SinkError, SinkKind, SinkOutcome};
use crate::config::StoreConfig;
use crate::event::MetagameEvent;
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::{Client, Collection};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-attempt failure, split by whether a retry could help.
enum AttemptError {
    Transient(SinkError),
    Permanent(SinkError),
}

/// Persists validated events into a MongoDB collection.
///
/// The client connects lazily; a failed insert is retried once before the
/// failure is reported, mirroring the queue publisher's policy.
pub struct StorePersister {
    collection: Collection<Document>,
    timeout: Duration,
}

impl StorePersister {
    /// Build a persister from configuration. Parses the connection string
    /// but does not touch the network; connections are made on first use.
    pub async fn connect(config: &StoreConfig) -> Result<Self, mongodb::error::Error> {
        let client = Client::with_uri_str(&config.url).await?;
        let collection = client
            .database(&config.database)
            .collection(&config.collection);

        Ok(Self {
            collection,
            timeout: Duration::from_millis(config.insert_timeout_ms),
        })
    }

    /// Insert one event, awaiting the write acknowledgement.
    pub async fn persist(&self, event: &MetagameEvent) -> SinkOutcome {
        match self.try_insert(event).await {
            Ok(inserted_id) => {
                debug!(id = %event.id, inserted_id = %inserted_id, "event persisted");
                SinkOutcome::Delivered
            }
            Err(AttemptError::Permanent(e)) => {
                warn!(id = %event.id, error = %e, "store rejected the document");
                SinkOutcome::Permanent(e)
            }
            Err(AttemptError::Transient(first)) => {
                debug!(id = %event.id, error = %first, "insert failed, retrying once");
                match self.try_insert(event).await {
                    Ok(inserted_id) => {
                        debug!(id = %event.id, inserted_id = %inserted_id, "insert retry succeeded");
                        SinkOutcome::Delivered
                    }
                    Err(AttemptError::Permanent(e)) => SinkOutcome::Permanent(e),
                    Err(AttemptError::Transient(e)) => {
                        warn!(id = %event.id, error = %e, "insert failed after retry");
                        SinkOutcome::Transient(e)
                    }
                }
            }
        }
    }

    async fn try_insert(&self, event: &MetagameEvent) -> Result<Bson, AttemptError> {
        let document = event_document(event);

        match tokio::time::timeout(self.timeout, self.collection.insert_one(document)).await {
            Ok(Ok(result)) => Ok(result.inserted_id),
            Ok(Err(e)) if is_permanent(&e) => {
                Err(AttemptError::Permanent(SinkError::Rejected(e.to_string())))
            }
            Ok(Err(e)) => Err(AttemptError::Transient(SinkError::Connection(
                e.to_string(),
            ))),
            Err(_) => Err(AttemptError::Transient(SinkError::Timeout(
                self.timeout.as_millis() as u64,
            ))),
        }
    }

    /// Number of documents in the alert collection.
    pub async fn count(&self) -> Result<u64, mongodb::error::Error> {
        self.collection.count_documents(doc! {}).await
    }
}

#[async_trait]
impl EventSink for StorePersister {
    fn kind(&self) -> SinkKind {
        SinkKind::Store
    }

    async fn deliver(&self, event: &MetagameEvent) -> SinkOutcome {
        self.persist(event).await
    }
}

/// Write and serialization errors will fail identically on retry;
/// everything else (I/O, server selection, timeouts) may recover.
fn is_permanent(error: &mongodb::error::Error) -> bool {
    matches!(
        *error.kind,
        ErrorKind::Write(_) | ErrorKind::BsonSerialization(_) | ErrorKind::InvalidArgument { .. }
    )
}

/// The document shape for one alert. No `_id`: the server assigns one.
fn event_document(event: &MetagameEvent) -> Document {
    doc! {
        "event_key": event.id.to_string(),
        "event_id": event.event_id as i64,
        "state": event.state.name(),
        "world_id": event.world_id as i64,
        "zone_id": event.zone_id as i64,
        "instance_id": event.instance_id as i64,
        "nc": event.nc,
        "tr": event.tr,
        "vs": event.vs,
        "xp": event.xp,
        "timestamp": event.timestamp,
        "received_at": event.received_at.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventId, MetagameState};
    use chrono::Utc;

    fn test_event() -> MetagameEvent {
        MetagameEvent {
            id: EventId::new(17, 12345),
            event_id: 123,
            state: MetagameState::Started,
            world_id: 17,
            zone_id: 2,
            instance_id: 12345,
            nc: 40.0,
            tr: 30.0,
            vs: 20.0,
            xp: 25.0,
            timestamp: 1671234567,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_document_has_no_id_key() {
        // A retried insert must create a duplicate document, never a
        // duplicate-key error, so the server assigns the `_id`.
        let document = event_document(&test_event());
        assert!(!document.contains_key("_id"));
        assert_eq!(document.get_str("event_key").unwrap(), "17-12345");
    }

    #[test]
    fn test_document_fields_exact() {
        let document = event_document(&test_event());

        assert_eq!(document.get_i64("event_id").unwrap(), 123);
        assert_eq!(document.get_str("state").unwrap(), "started");
        assert_eq!(document.get_i64("world_id").unwrap(), 17);
        assert_eq!(document.get_i64("zone_id").unwrap(), 2);
        assert_eq!(document.get_i64("instance_id").unwrap(), 12345);
        assert_eq!(document.get_f64("nc").unwrap(), 40.0);
        assert_eq!(document.get_f64("tr").unwrap(), 30.0);
        assert_eq!(document.get_f64("vs").unwrap(), 20.0);
        assert_eq!(document.get_f64("xp").unwrap(), 25.0);
        assert_eq!(document.get_i64("timestamp").unwrap(), 1671234567);
        assert!(document.get_str("received_at").is_ok());
    }

    #[test]
    fn test_documents_independent() {
        let event = test_event();
        assert_eq!(event_document(&event), event_document(&event));
    }
}
