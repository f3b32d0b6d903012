//! Warpgate Simulator - Synthetic Alert Injection
//!
//! Pushes one synthetic metagame event through the real sinks so operators
//! can verify Redis and MongoDB connectivity without waiting for a live
//! alert. Prints the delivery disposition and the resulting store count.
//!
//! ## Configuration
//!
//! Uses the same configuration file as the main daemon:
//! - `WARPGATE_CONFIG`: path to the TOML config (default: "config/warpgate.toml")
//! - `RUST_LOG`: Logging level (default: "info")

use chrono::Utc;
use deadpool_redis::{Config as RedisConfig, Runtime};
use std::sync::Arc;
use tracing::info;

use warpgate_ess::config::EssConfig;
use warpgate_ess::dispatch::Dispatcher;
use warpgate_ess::event::{EventId, MetagameEvent, MetagameState};
use warpgate_ess::metrics::PipelineMetrics;
use warpgate_ess::sinks::{EventSink, QueuePublisher, StorePersister};

/// A plausible Emerald/Indar alert, timestamped now.
fn synthetic_event() -> MetagameEvent {
    let now = Utc::now();
    MetagameEvent {
        id: EventId::new(17, 123456),
        event_id: 123,
        state: MetagameState::Started,
        world_id: 17,
        zone_id: 2,
        instance_id: 123456,
        nc: 40.0,
        tr: 30.0,
        vs: 20.0,
        xp: 25.0,
        timestamp: now.timestamp(),
        received_at: now,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = EssConfig::load()?;

    let redis_pool = RedisConfig::from_url(&config.queue.url)
        .create_pool(Some(Runtime::Tokio1))?;
    let queue = Arc::new(QueuePublisher::new(redis_pool, &config.queue));
    let store = Arc::new(StorePersister::connect(&config.store).await?);

    let metrics = Arc::new(PipelineMetrics::new());
    let dispatcher = Dispatcher::new(
        queue as Arc<dyn EventSink>,
        store.clone() as Arc<dyn EventSink>,
        config.retry.policy(),
        metrics,
    );

    let event = synthetic_event();
    info!(
        id = %event.id,
        world = event.world_name().unwrap_or("unknown"),
        zone = event.zone_name().unwrap_or("unknown"),
        "injecting synthetic alert"
    );

    let disposition = dispatcher.dispatch(&event).await;
    println!("event {}: {}", event.id, disposition);

    let count = store.count().await?;
    println!("store now holds {count} alert documents");

    Ok(())
}
