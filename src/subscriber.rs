//! Live subscription to the Census push websocket.
//!
//! [`StreamSubscriber`] owns the connection lifecycle: connect, send the
//! subscribe frame, read frames, watch for silence, reconnect with
//! exponential backoff. Validated events are dispatched inline on the same
//! task, so a slow sink stalls intake and in-flight work is bounded to one
//! event.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed <-> Degraded
//!                     ^             │             │
//!                     └─────────────┴─────────────┘  (hard disconnect)
//! ```
//!
//! Degraded is entered when no frame arrives within the heartbeat window;
//! traffic resuming restores Subscribed, a second silent window forces a
//! reconnect. Disconnected is terminal and only reached on shutdown.
//!
//! Events may be lost across a reconnect boundary (the upstream does not
//! replay), but are never duplicated.

use crate::backoff::Backoff;
use crate::config::EssConfig;
use crate::dispatch::Dispatcher;
use crate::event::StreamMessage;
use crate::metrics::PipelineMetrics;
use crate::shutdown::ShutdownSignal;
use crate::validate::{EventValidator, Rejection};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Process-wide state of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Connection settings for the subscriber, extracted from [`EssConfig`].
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Full websocket URL including environment and service id
    pub url: String,
    /// World ids to subscribe to, or `["all"]`
    pub worlds: Vec<String>,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Silence window before the subscription degrades
    pub heartbeat_window: Duration,
}

impl SubscriberConfig {
    pub fn from_config(config: &EssConfig) -> Self {
        Self {
            url: config.census.url(),
            worlds: config.census.worlds.clone(),
            reconnect_initial: Duration::from_millis(config.reconnect.initial_delay_ms),
            reconnect_max: Duration::from_millis(config.reconnect.max_delay_ms),
            heartbeat_window: Duration::from_secs(config.reconnect.heartbeat_window_secs),
        }
    }
}

/// Owns the Census subscription and drives the dispatcher loop.
pub struct StreamSubscriber {
    config: SubscriberConfig,
    validator: EventValidator,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<PipelineMetrics>,
    shutdown: ShutdownSignal,
    state_tx: watch::Sender<SubscriptionState>,
    // Keeps the watch channel alive even when no outer observer subscribes.
    _state_rx: watch::Receiver<SubscriptionState>,
}

impl StreamSubscriber {
    pub fn new(
        config: SubscriberConfig,
        validator: EventValidator,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<PipelineMetrics>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Disconnected);
        Self {
            config,
            validator,
            dispatcher,
            metrics,
            shutdown,
            state_tx,
            _state_rx: state_rx,
        }
    }

    /// Observe subscription state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SubscriptionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: SubscriptionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "subscription state transition");
        }
    }

    /// Run the subscription until shutdown. Consumes the subscriber; spawn
    /// this on its own task.
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            self.set_state(SubscriptionState::Connecting);
            debug!(url = %self.config.url, attempt = backoff.attempt(), "connecting to census push service");

            let ws_stream = match connect_async(&self.config.url).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(error = %e, "census connection failed");
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown_rx.recv() => break,
                    }
                }
            };

            let (mut write, mut read) = ws_stream.split();

            let subscribe = subscribe_frame(&self.config.worlds);
            if let Err(e) = write.send(Message::Text(subscribe.into())).await {
                warn!(error = %e, "failed to send subscribe frame");
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown_rx.recv() => break,
                }
            }

            self.set_state(SubscriptionState::Subscribed);
            backoff.reset();
            info!(worlds = ?self.config.worlds, "subscribed to MetagameEvent feed");

            let mut last_frame = tokio::time::Instant::now();
            let mut degraded = false;

            // Read loop. Breaking out of it forces a reconnect; returning
            // ends the subscription for good.
            loop {
                tokio::select! {
                    // Shutdown first: a buffered frame must never be
                    // admitted once shutdown has begun.
                    biased;
                    _ = shutdown_rx.recv() => {
                        // The in-flight dispatch (if any) already completed:
                        // this branch is only polled between frames.
                        let _ = write.send(Message::Close(None)).await;
                        self.set_state(SubscriptionState::Disconnected);
                        info!("shutdown requested, census subscription closed");
                        return;
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_frame = tokio::time::Instant::now();
                            if degraded {
                                degraded = false;
                                self.set_state(SubscriptionState::Subscribed);
                            }
                            if !self.handle_frame(text.as_str()).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_frame = tokio::time::Instant::now();
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("census sent close frame");
                            break;
                        }
                        Some(Ok(_)) => {} // Pong, Binary, Frame
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read error");
                            break;
                        }
                        None => {
                            info!("census stream ended");
                            break;
                        }
                    },
                    () = tokio::time::sleep_until(last_frame + self.config.heartbeat_window) => {
                        if degraded {
                            warn!("still silent while degraded, forcing reconnect");
                            break;
                        }
                        warn!(
                            window_secs = self.config.heartbeat_window.as_secs(),
                            "no traffic within heartbeat window"
                        );
                        degraded = true;
                        self.set_state(SubscriptionState::Degraded);
                        last_frame = tokio::time::Instant::now();
                    }
                }
            }

            self.metrics.record_reconnect();
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        self.set_state(SubscriptionState::Disconnected);
    }

    /// Classify and process one text frame. Returns `false` when the frame
    /// demands a reconnect.
    async fn handle_frame(&self, text: &str) -> bool {
        self.metrics.record_frame();

        match StreamMessage::classify(text) {
            StreamMessage::Service(raw) => match self.validator.validate(&raw) {
                Ok(event) => {
                    info!(
                        id = %event.id,
                        state = %event.state,
                        world = event.world_name().unwrap_or("unknown"),
                        zone = event.zone_name().unwrap_or("unknown"),
                        "received metagame event"
                    );
                    self.dispatcher.dispatch(&event).await;

                    let validated = self.metrics.record_validated();
                    if validated % 100 == 0 {
                        let snapshot = self.metrics.snapshot();
                        info!(
                            events_validated = snapshot.events_validated,
                            fully_delivered = snapshot.fully_delivered,
                            partially_delivered = snapshot.partially_delivered,
                            reconnects = snapshot.reconnects,
                            "pipeline statistics"
                        );
                    }
                }
                Err(Rejection::WrongKind) => {
                    // Other event kinds are expected traffic, not errors.
                    self.metrics.record_ignored();
                }
                Err(reason) => {
                    self.metrics.record_rejected();
                    warn!(reason = %reason, "rejected malformed service message");
                }
            },
            StreamMessage::Heartbeat => {
                debug!("census heartbeat");
            }
            StreamMessage::ConnectionState { connected } => {
                if !connected {
                    warn!("census announced disconnect");
                    return false;
                }
            }
            StreamMessage::SubscriptionEcho => {
                debug!("subscription confirmed");
            }
            StreamMessage::Other => {}
        }

        true
    }
}

/// The Census subscribe request for the monitored event kind.
fn subscribe_frame(worlds: &[String]) -> String {
    json!({
        "service": "event",
        "action": "subscribe",
        "worlds": worlds,
        "eventNames": [crate::MONITORED_EVENT],
    })
    .to_string()
}
