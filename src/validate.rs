//! Validation of raw Census payloads into [`MetagameEvent`]s.
//!
//! The validator is the only place a [`MetagameEvent`] is constructed: a
//! payload that fails any check is rejected and no event exists for it.
//! Census encodes every numeric field as a JSON string; native JSON numbers
//! are accepted too.

use crate::event::{EventId, MetagameEvent, MetagameState, RawMessage};
use crate::MONITORED_EVENT;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

/// Why a raw payload was not turned into an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    /// The payload is not the monitored event kind. Silent: counted but
    /// never reported as an error.
    #[error("not the monitored event kind")]
    WrongKind,

    /// A schema-required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but not coercible to its declared type, or is
    /// outside its domain bounds.
    #[error("field `{0}` is not of the expected type")]
    TypeMismatch(&'static str),
}

/// Converts raw payloads into validated [`MetagameEvent`]s.
///
/// Pure except for stamping the reception timestamp on success.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventValidator;

impl EventValidator {
    /// Validate one raw payload.
    pub fn validate(&self, raw: &RawMessage) -> Result<MetagameEvent, Rejection> {
        let kind = raw.field("event_name").and_then(Value::as_str);
        if kind != Some(MONITORED_EVENT) {
            return Err(Rejection::WrongKind);
        }

        let world_id = u32_field(raw, "world_id")?;
        let instance_id = u32_field(raw, "instance_id")?;
        let event_id = u32_field(raw, "metagame_event_id")?;
        let zone_id = u32_field(raw, "zone_id")?;

        // The state classifier is part of the schema; an unmapped id is a
        // mismatch on that field.
        let state_id = u32_field(raw, "metagame_event_state")?;
        let state = MetagameState::from_id(state_id)
            .ok_or(Rejection::TypeMismatch("metagame_event_state"))?;

        let nc = f64_field(raw, "faction_nc")?;
        let tr = f64_field(raw, "faction_tr")?;
        let vs = f64_field(raw, "faction_vs")?;
        let xp = f64_field(raw, "experience_bonus")?;

        let timestamp = i64_field(raw, "timestamp")?;
        if timestamp <= 0 {
            return Err(Rejection::TypeMismatch("timestamp"));
        }

        Ok(MetagameEvent {
            id: EventId::new(world_id, instance_id),
            event_id,
            state,
            world_id,
            zone_id,
            instance_id,
            nc,
            tr,
            vs,
            xp,
            timestamp,
            received_at: Utc::now(),
        })
    }
}

fn u32_field(raw: &RawMessage, name: &'static str) -> Result<u32, Rejection> {
    let value = raw.field(name).ok_or(Rejection::MissingField(name))?;
    match value {
        Value::String(s) => s.trim().parse().map_err(|_| Rejection::TypeMismatch(name)),
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(Rejection::TypeMismatch(name)),
        _ => Err(Rejection::TypeMismatch(name)),
    }
}

fn f64_field(raw: &RawMessage, name: &'static str) -> Result<f64, Rejection> {
    let value = raw.field(name).ok_or(Rejection::MissingField(name))?;
    let parsed = match value {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Rejection::TypeMismatch(name))?,
        Value::Number(n) => n.as_f64().ok_or(Rejection::TypeMismatch(name))?,
        _ => return Err(Rejection::TypeMismatch(name)),
    };
    // Percentages and bonuses are never negative.
    if parsed < 0.0 || !parsed.is_finite() {
        return Err(Rejection::TypeMismatch(name));
    }
    Ok(parsed)
}

fn i64_field(raw: &RawMessage, name: &'static str) -> Result<i64, Rejection> {
    let value = raw.field(name).ok_or(Rejection::MissingField(name))?;
    match value {
        Value::String(s) => s.trim().parse().map_err(|_| Rejection::TypeMismatch(name)),
        Value::Number(n) => n.as_i64().ok_or(Rejection::TypeMismatch(name)),
        _ => Err(Rejection::TypeMismatch(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawMessage;
    use serde_json::json;

    /// A complete payload the way Census actually sends it: every numeric
    /// field encoded as a string.
    fn census_payload() -> RawMessage {
        RawMessage(json!({
            "event_name": "MetagameEvent",
            "experience_bonus": "25.0",
            "faction_nc": "41.176470",
            "faction_tr": "32.352940",
            "faction_vs": "26.470587",
            "instance_id": "12345",
            "metagame_event_id": "123",
            "metagame_event_state": "135",
            "timestamp": "1671234567",
            "world_id": "17",
            "zone_id": "2"
        }))
    }

    #[test]
    fn test_validate_census_strings() {
        let event = EventValidator.validate(&census_payload()).unwrap();

        assert_eq!(event.id.to_string(), "17-12345");
        assert_eq!(event.event_id, 123);
        assert_eq!(event.state, MetagameState::Started);
        assert_eq!(event.world_id, 17);
        assert_eq!(event.zone_id, 2);
        assert_eq!(event.instance_id, 12345);
        assert_eq!(event.nc, 41.176470);
        assert_eq!(event.tr, 32.352940);
        assert_eq!(event.vs, 26.470587);
        assert_eq!(event.xp, 25.0);
        assert_eq!(event.timestamp, 1671234567);
    }

    #[test]
    fn test_validate_native_numbers() {
        let raw = RawMessage(json!({
            "event_name": "MetagameEvent",
            "experience_bonus": 25.0,
            "faction_nc": 40.0,
            "faction_tr": 30.0,
            "faction_vs": 20.0,
            "instance_id": 1,
            "metagame_event_id": 1,
            "metagame_event_state": 138,
            "timestamp": 1234,
            "world_id": 5,
            "zone_id": 2
        }));

        let event = EventValidator.validate(&raw).unwrap();
        assert_eq!(event.world_id, 5);
        assert_eq!(event.state, MetagameState::Ended);
        assert_eq!(event.timestamp, 1234);
    }

    #[test]
    fn test_wrong_kind_is_wrong_kind() {
        let raw = RawMessage(json!({
            "event_name": "FacilityControl",
            "world_id": "17"
        }));
        assert_eq!(
            EventValidator.validate(&raw),
            Err(Rejection::WrongKind)
        );

        // No event_name at all is also not the monitored kind.
        let raw = RawMessage(json!({"world_id": "17"}));
        assert_eq!(EventValidator.validate(&raw), Err(Rejection::WrongKind));
    }

    #[test]
    fn test_missing_field() {
        let mut value = census_payload().0;
        value.as_object_mut().unwrap().remove("zone_id");
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::MissingField("zone_id"))
        );

        let mut value = census_payload().0;
        value.as_object_mut().unwrap().remove("timestamp");
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::MissingField("timestamp"))
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut value = census_payload().0;
        value["world_id"] = json!("not-a-number");
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::TypeMismatch("world_id"))
        );

        let mut value = census_payload().0;
        value["world_id"] = json!(-5);
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::TypeMismatch("world_id"))
        );

        let mut value = census_payload().0;
        value["faction_nc"] = json!("-1.0");
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::TypeMismatch("faction_nc"))
        );
    }

    #[test]
    fn test_unknown_state_id() {
        let mut value = census_payload().0;
        value["metagame_event_state"] = json!("999");
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::TypeMismatch("metagame_event_state"))
        );
    }

    #[test]
    fn test_non_positive_timestamp() {
        let mut value = census_payload().0;
        value["timestamp"] = json!("0");
        assert_eq!(
            EventValidator.validate(&RawMessage(value)),
            Err(Rejection::TypeMismatch("timestamp"))
        );
    }
}
