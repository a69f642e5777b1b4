//! Turns what the transports receive into client events.
//!
//! Broker messages arrive as `(topic, body)` pairs and must be validated
//! here.  Push-channel messages are already typed [`HubEvent`]s and only need
//! to be sorted into "deliver to subscribers" and "answer a waiting caller".

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use telemetry_core::{
    CommandOutcome, HubEvent, ParamId, ReadingError, SensorReading, StatusReport, TransportTag,
};
use thiserror::Error;

use crate::domain::events::{ClientEvent, CommandResult, DiagnosticKind, SensorEvent};

/// Topic prefix every sensor message is published under.
pub const SENSOR_TOPIC_ROOT: &str = "sensors";

/// Why a broker message was dropped.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("topic '{0}' is not under {SENSOR_TOPIC_ROOT}/<device>/<param>")]
    Topic(String),

    #[error("body is not JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("no parameter id in topic or body")]
    MissingParam,

    #[error(transparent)]
    Reading(#[from] ReadingError),
}

/// `sensors/<deviceId>/<parameterId>`, split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorTopic {
    pub device_id: String,
    /// Absent for `sensors/<deviceId>`.  Multi-level remainders
    /// (`sensors/d1/bank/2`) are kept as one path.
    pub param_id: Option<ParamId>,
}

impl SensorTopic {
    /// # Errors
    ///
    /// [`InboundError::Topic`] when the topic is outside `sensors/` or has
    /// an empty device segment.
    pub fn parse(topic: &str) -> Result<Self, InboundError> {
        let rest = topic
            .strip_prefix(SENSOR_TOPIC_ROOT)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| InboundError::Topic(topic.to_string()))?;
        let (device, param) = match rest.split_once('/') {
            Some((device, param)) => (device, Some(param)),
            None => (rest, None),
        };
        if device.is_empty() {
            return Err(InboundError::Topic(topic.to_string()));
        }
        Ok(Self {
            device_id: device.to_string(),
            param_id: param.filter(|p| !p.is_empty()).map(ParamId::from_segment),
        })
    }
}

/// Validates one broker message.
///
/// The body may be a full reading (`{"paramId":..,"value":..}`), an object
/// without `paramId` (taken from the topic), or a bare value such as `85`.
///
/// # Errors
///
/// See [`InboundError`].  The caller drops the message.
pub fn parse_broker_message(
    topic: &str,
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<SensorEvent, InboundError> {
    let route = SensorTopic::parse(topic)?;
    let body: Value = serde_json::from_slice(body).map_err(InboundError::Malformed)?;

    let document = match (body, route.param_id) {
        (Value::Object(mut fields), Some(param)) => {
            fields
                .entry("paramId")
                .or_insert_with(|| param_to_json(&param));
            Value::Object(fields)
        }
        (Value::Object(fields), None) => {
            if !fields.contains_key("paramId") {
                return Err(InboundError::MissingParam);
            }
            Value::Object(fields)
        }
        (value, Some(param)) => {
            let mut fields = Map::new();
            fields.insert("paramId".into(), param_to_json(&param));
            fields.insert("value".into(), value);
            Value::Object(fields)
        }
        (_, None) => return Err(InboundError::MissingParam),
    };

    let reading = SensorReading::from_value(document)?;
    Ok(SensorEvent::from_reading(
        TransportTag::Broker,
        Some(route.device_id),
        reading,
        received_at,
    ))
}

fn param_to_json(param: &ParamId) -> Value {
    match param {
        ParamId::Numeric(n) => Value::Number(n.clone()),
        ParamId::Path(p) => Value::String(p.clone()),
    }
}

/// A push-channel message, sorted.
#[derive(Debug, Clone, PartialEq)]
pub enum PushInbound {
    /// Goes straight to subscribers.
    Deliver(ClientEvent),
    /// Answers `send_command`, if someone is waiting for `id`.
    CommandReply {
        id: Option<u64>,
        result: CommandResult,
    },
    /// Answers `request_hardware_status`.
    StatusReply(StatusReport),
}

pub fn classify_push(event: HubEvent, received_at: DateTime<Utc>) -> PushInbound {
    match event {
        HubEvent::SensorData(reading) => PushInbound::Deliver(ClientEvent::Sensor(
            SensorEvent::from_reading(TransportTag::Push, None, reading, received_at),
        )),
        HubEvent::SerialStatus { connected } => {
            PushInbound::Deliver(ClientEvent::HardwareStatus { connected })
        }
        HubEvent::SerialError(notice) => PushInbound::Deliver(ClientEvent::Diagnostic {
            kind: DiagnosticKind::Serial,
            message: notice.message,
        }),
        HubEvent::DataError(notice) => PushInbound::Deliver(ClientEvent::Diagnostic {
            kind: DiagnosticKind::Data,
            message: notice.message,
        }),
        HubEvent::CommandSuccess(CommandOutcome { id, message }) => PushInbound::CommandReply {
            id,
            result: CommandResult::Sent { message },
        },
        HubEvent::CommandError(CommandOutcome { id, message }) => PushInbound::CommandReply {
            id,
            result: CommandResult::Rejected { message },
        },
        HubEvent::Status(report) => PushInbound::StatusReply(report),
    }
}

/// What subscribers see for a command reply nobody was waiting for, if
/// anything.
pub fn unclaimed_reply(result: CommandResult) -> Option<ClientEvent> {
    match result {
        CommandResult::Rejected { message } => Some(ClientEvent::Diagnostic {
            kind: DiagnosticKind::Command,
            message,
        }),
        CommandResult::Sent { .. } => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use telemetry_core::{Notice, SensorValue};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_topic_with_device_and_numeric_param() {
        let topic = SensorTopic::parse("sensors/rack-4/12").unwrap();
        assert_eq!(topic.device_id, "rack-4");
        assert_eq!(topic.param_id, Some(ParamId::from(12)));
    }

    #[test]
    fn test_topic_with_nested_param_keeps_path() {
        let topic = SensorTopic::parse("sensors/d1/bank/2").unwrap();
        assert_eq!(topic.param_id, Some(ParamId::Path("bank/2".into())));
    }

    #[test]
    fn test_topic_outside_root_is_rejected() {
        assert!(matches!(
            SensorTopic::parse("alerts/d1/1"),
            Err(InboundError::Topic(_))
        ));
        assert!(matches!(
            SensorTopic::parse("sensors//1"),
            Err(InboundError::Topic(_))
        ));
        assert!(matches!(
            SensorTopic::parse("sensorsX/d1"),
            Err(InboundError::Topic(_))
        ));
    }

    #[test]
    fn test_full_reading_body_is_accepted() {
        // Act
        let event =
            parse_broker_message("sensors/d1/1", br#"{"paramId":1,"value":85,"zone":"A"}"#, now())
                .unwrap();

        // Assert
        assert_eq!(event.source, TransportTag::Broker);
        assert_eq!(event.device_id.as_deref(), Some("d1"));
        assert_eq!(event.param_id, ParamId::from(1));
        assert_eq!(event.value.as_f64(), Some(85.0));
        assert_eq!(event.extra.get("zone"), Some(&json!("A")));
    }

    #[test]
    fn test_body_param_wins_over_topic() {
        let event =
            parse_broker_message("sensors/d1/9", br#"{"paramId":3,"value":1}"#, now()).unwrap();
        assert_eq!(event.param_id, ParamId::from(3));
    }

    #[test]
    fn test_object_without_param_takes_it_from_topic() {
        let event =
            parse_broker_message("sensors/d1/humidity", br#"{"value":40}"#, now()).unwrap();
        assert_eq!(event.param_id, ParamId::Path("humidity".into()));
    }

    #[test]
    fn test_bare_value_body_is_wrapped() {
        let event = parse_broker_message("sensors/d1/2", b"true", now()).unwrap();
        assert_eq!(event.param_id, ParamId::from(2));
        assert_eq!(event.value, SensorValue::Flag(true));
    }

    #[test]
    fn test_invalid_json_body_is_malformed() {
        let result = parse_broker_message("sensors/d1/1", b"{not json", now());
        assert!(matches!(result, Err(InboundError::Malformed(_))));
    }

    #[test]
    fn test_null_value_fails_schema() {
        let result = parse_broker_message("sensors/d1/1", br#"{"value":null}"#, now());
        assert!(matches!(
            result,
            Err(InboundError::Reading(ReadingError::Schema(_)))
        ));
    }

    #[test]
    fn test_device_topic_without_param_needs_body_param() {
        assert!(matches!(
            parse_broker_message("sensors/d1", b"85", now()),
            Err(InboundError::MissingParam)
        ));
        assert!(parse_broker_message("sensors/d1", br#"{"paramId":5,"value":1}"#, now()).is_ok());
    }

    #[test]
    fn test_push_sensor_data_is_delivered_as_push_event() {
        let reading = SensorReading::from_json(r#"{"paramId":1,"value":85}"#).unwrap();
        match classify_push(HubEvent::SensorData(reading), now()) {
            PushInbound::Deliver(ClientEvent::Sensor(event)) => {
                assert_eq!(event.source, TransportTag::Push);
                assert_eq!(event.device_id, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_push_diagnostics_keep_their_kind() {
        assert_eq!(
            classify_push(HubEvent::DataError(Notice::new("Failed to parse sensor data")), now()),
            PushInbound::Deliver(ClientEvent::Diagnostic {
                kind: DiagnosticKind::Data,
                message: "Failed to parse sensor data".into()
            })
        );
        assert_eq!(
            classify_push(HubEvent::SerialStatus { connected: false }, now()),
            PushInbound::Deliver(ClientEvent::HardwareStatus { connected: false })
        );
    }

    #[test]
    fn test_command_outcomes_become_replies() {
        let reply = classify_push(
            HubEvent::CommandError(CommandOutcome {
                id: Some(4),
                message: "Hardware not connected".into(),
            }),
            now(),
        );
        assert_eq!(
            reply,
            PushInbound::CommandReply {
                id: Some(4),
                result: CommandResult::Rejected {
                    message: "Hardware not connected".into()
                }
            }
        );
    }

    #[test]
    fn test_unclaimed_rejection_becomes_diagnostic_and_success_is_silent() {
        assert_eq!(
            unclaimed_reply(CommandResult::Rejected {
                message: "Failed to send command".into()
            }),
            Some(ClientEvent::Diagnostic {
                kind: DiagnosticKind::Command,
                message: "Failed to send command".into()
            })
        );
        assert_eq!(
            unclaimed_reply(CommandResult::Sent {
                message: "Command sent successfully".into()
            }),
            None
        );
    }
}
