use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line on the command/response wire: a request (`command` +
/// optional `request_id`) or a reply (`result`/`error` + the same
/// `request_id`). All fields are optional because a single struct
/// represents both directions.
///
/// `extra` flattens any top-level keys outside the fixed fields below,
/// both ways: a mapping-shaped handler result is merged in directly
/// (`{"status":"ok","request_id":"r1"}` rather than wrapped under
/// `result`), and an inbound message carrying keys this struct doesn't
/// know about doesn't lose them on a parse/re-serialize round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FramedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FramedMessage {
    pub fn request(command: impl Into<String>, data: Value, request_id: Option<String>) -> Self {
        Self {
            command: Some(command.into()),
            data: Some(data),
            request_id,
            ..Default::default()
        }
    }

    pub fn is_reply(&self) -> bool {
        self.command.is_none()
            && (self.result.is_some() || self.error.is_some() || !self.extra.is_empty())
    }
}

/// One line on the one-way status channel: lifecycle or exception
/// signalling, never a reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusRecord {
    Status { message: String },
    Exception {
        exception: String,
        message: String,
        traceback: String,
    },
}

impl StatusRecord {
    pub fn ok() -> Self {
        StatusRecord::Status {
            message: "ok".to_string(),
        }
    }

    pub fn exit() -> Self {
        StatusRecord::Status {
            message: "exit".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_record_round_trips_through_json() {
        let record = StatusRecord::Exception {
            exception: "ValueError".to_string(),
            message: "x".to_string(),
            traceback: "Traceback (most recent call last)".to_string(),
        };
        let text = serde_json::to_string(&record).unwrap();
        let parsed: StatusRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn framed_message_reply_shape_matches_wire_contract() {
        let reply = FramedMessage {
            result: Some(json!("Hello, Ada!")),
            request_id: Some("r1".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value, json!({"result": "Hello, Ada!", "request_id": "r1"}));
        assert!(reply.is_reply());
    }

    #[test]
    fn mapping_shaped_extra_is_merged_with_request_id_instead_of_wrapped() {
        let mut extra = Map::new();
        extra.insert("status".to_string(), json!("ok"));
        extra.insert("count".to_string(), json!(3));

        let reply = FramedMessage {
            request_id: Some("r1".to_string()),
            extra,
            ..Default::default()
        };

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value, json!({"status": "ok", "count": 3, "request_id": "r1"}));
        assert!(reply.is_reply());
    }
}
