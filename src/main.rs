use deadpool_redis::{Config as RedisConfig, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use warpgate_ess::config::EssConfig;
use warpgate_ess::dispatch::Dispatcher;
use warpgate_ess::metrics::PipelineMetrics;
use warpgate_ess::shutdown::ShutdownSignal;
use warpgate_ess::sinks::{EventSink, QueuePublisher, StorePersister};
use warpgate_ess::subscriber::{StreamSubscriber, SubscriberConfig};
use warpgate_ess::validate::EventValidator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Logging
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    // 2. Load Configuration
    let config = EssConfig::load()?;
    info!(
        endpoint = %config.census.endpoint,
        environment = %config.census.environment,
        worlds = ?config.census.worlds,
        "starting warpgate event stream pipeline"
    );

    // 3. Setup Sinks
    let redis_pool = RedisConfig::from_url(&config.queue.url)
        .create_pool(Some(Runtime::Tokio1))?;
    let queue = Arc::new(QueuePublisher::new(redis_pool, &config.queue));
    info!(stream = %config.queue.stream, "alert queue publisher ready");

    let store = Arc::new(StorePersister::connect(&config.store).await?);
    info!(
        database = %config.store.database,
        collection = %config.store.collection,
        "alert store persister ready"
    );

    // 4. Build the Pipeline
    let metrics = Arc::new(PipelineMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone() as Arc<dyn EventSink>,
        store.clone() as Arc<dyn EventSink>,
        config.retry.policy(),
        metrics.clone(),
    ));

    let shutdown = ShutdownSignal::with_timeout(Duration::from_secs(config.shutdown.grace_secs));
    let subscriber = StreamSubscriber::new(
        SubscriberConfig::from_config(&config),
        EventValidator,
        dispatcher,
        metrics.clone(),
        shutdown.clone(),
    );

    // Surface state transitions at the top level so operators see them even
    // with module-filtered logging.
    let mut state_rx = subscriber.state_watch();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!(%state, "subscription state");
        }
    });

    // 5. Run until a signal arrives
    let pipeline = tokio::spawn(subscriber.run());

    shutdown.wait().await;
    info!(
        grace_secs = config.shutdown.grace_secs,
        "signal received, draining pipeline"
    );

    match tokio::time::timeout(shutdown.timeout(), pipeline).await {
        Ok(Ok(())) => info!("pipeline drained cleanly"),
        Ok(Err(e)) => error!(error = %e, "pipeline task panicked"),
        Err(_) => warn!("grace period expired with work still in flight"),
    }

    let snapshot = metrics.snapshot();
    info!(
        frames_received = snapshot.frames_received,
        events_validated = snapshot.events_validated,
        events_ignored = snapshot.events_ignored,
        events_rejected = snapshot.events_rejected,
        fully_delivered = snapshot.fully_delivered,
        partially_delivered = snapshot.partially_delivered,
        undelivered = snapshot.undelivered,
        reconnects = snapshot.reconnects,
        uptime_secs = metrics.uptime_seconds(),
        "final pipeline statistics"
    );

    Ok(())
}
