//! Census event types for the ESS pipeline.
//!
//! Inbound websocket frames are classified into a [`StreamMessage`]; the
//! `payload` of a service message becomes a [`RawMessage`], which the
//! validator turns into the canonical [`MetagameEvent`].
//!
//! # Wire format
//!
//! The Census push service interleaves service messages with heartbeats and
//! connection-state notices, all as JSON text frames:
//!
//! ```json
//! {
//!   "service": "event",
//!   "type": "serviceMessage",
//!   "payload": {
//!     "event_name": "MetagameEvent",
//!     "world_id": "17",
//!     "instance_id": "12345",
//!     ...
//!   }
//! }
//! ```
//!
//! Note that Census encodes every numeric payload field as a JSON string.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

/// The opaque `payload` object of one Census service message.
///
/// Untyped until validated; discarded after validation or rejection.
#[derive(Debug, Clone)]
pub struct RawMessage(pub Value);

impl RawMessage {
    /// Look up a payload field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// Classification of one inbound websocket frame.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A service message carrying an event payload.
    Service(RawMessage),
    /// A periodic heartbeat listing endpoint health.
    Heartbeat,
    /// The push service announced a connection state change.
    ConnectionState { connected: bool },
    /// Echo of our own subscription request.
    SubscriptionEcho,
    /// Anything else (help text, unparseable frames).
    Other,
}

impl StreamMessage {
    /// Classify one text frame from the Census push websocket.
    ///
    /// Never fails: frames that don't parse or don't match a known shape
    /// come back as [`StreamMessage::Other`].
    pub fn classify(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Self::Other,
        };

        if value.get("subscription").is_some() {
            return Self::SubscriptionEcho;
        }

        match value.get("type").and_then(Value::as_str) {
            Some("serviceMessage") => match value.get("payload") {
                Some(payload) => Self::Service(RawMessage(payload.clone())),
                None => Self::Other,
            },
            Some("heartbeat") => Self::Heartbeat,
            Some("connectionStateChanged") => {
                let connected = value.get("connected").map(is_truthy).unwrap_or(false);
                Self::ConnectionState { connected }
            }
            _ => Self::Other,
        }
    }
}

/// Census sends booleans both as JSON bools and as the strings "true"/"false".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

/// Unique key of one alert occurrence: world id + instance id.
///
/// Displays as `"world-instance"`, e.g. `"17-12345"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    pub world_id: u32,
    pub instance_id: u32,
}

impl EventId {
    pub fn new(world_id: u32, instance_id: u32) -> Self {
        Self {
            world_id,
            instance_id,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.world_id, self.instance_id)
    }
}

/// Lifecycle classifier of a metagame event, from the Census state ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetagameState {
    Started,
    Restarted,
    Cancelled,
    Ended,
    XpBonusChanged,
}

impl MetagameState {
    /// Map a Census `metagame_event_state` id to a classifier.
    ///
    /// Returns `None` for ids outside the known 135..=139 range.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            135 => Some(Self::Started),
            136 => Some(Self::Restarted),
            137 => Some(Self::Cancelled),
            138 => Some(Self::Ended),
            139 => Some(Self::XpBonusChanged),
            _ => None,
        }
    }

    /// The Census state id.
    pub fn id(self) -> u32 {
        match self {
            Self::Started => 135,
            Self::Restarted => 136,
            Self::Cancelled => 137,
            Self::Ended => 138,
            Self::XpBonusChanged => 139,
        }
    }

    /// Snake-case name used in serializations and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Restarted => "restarted",
            Self::Cancelled => "cancelled",
            Self::Ended => "ended",
            Self::XpBonusChanged => "xp_bonus_changed",
        }
    }
}

impl fmt::Display for MetagameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The canonical internal representation of one continent alert.
///
/// Immutable after construction; each sink builds its own serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct MetagameEvent {
    /// Unique key: world id + instance id
    pub id: EventId,

    /// Alert template id (`metagame_event_id`)
    pub event_id: u32,

    /// Lifecycle state (`metagame_event_state`)
    pub state: MetagameState,

    pub world_id: u32,
    pub zone_id: u32,
    pub instance_id: u32,

    /// Territory percentages per faction
    pub nc: f64,
    pub tr: f64,
    pub vs: f64,

    /// Experience bonus percentage
    pub xp: f64,

    /// Game-server epoch seconds
    pub timestamp: i64,

    /// Reception timestamp, assigned by the validator
    pub received_at: DateTime<Utc>,
}

impl MetagameEvent {
    /// Human-readable world name, for log enrichment only.
    pub fn world_name(&self) -> Option<&'static str> {
        world_name(self.world_id)
    }

    /// Human-readable zone (continent) name, for log enrichment only.
    pub fn zone_name(&self) -> Option<&'static str> {
        zone_name(self.zone_id)
    }
}

/// World id to server name.
pub fn world_name(id: u32) -> Option<&'static str> {
    match id {
        1 => Some("connery"),
        10 => Some("miller"),
        13 => Some("cobalt"),
        17 => Some("emerald"),
        19 => Some("jaeger"),
        40 => Some("soltech"),
        _ => None,
    }
}

/// Zone id to continent name.
pub fn zone_name(id: u32) -> Option<&'static str> {
    match id {
        2 => Some("indar"),
        4 => Some("hossin"),
        6 => Some("amerish"),
        8 => Some("esamir"),
        344 => Some("oshur"),
        _ => None,
    }
}
