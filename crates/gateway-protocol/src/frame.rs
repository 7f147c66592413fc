//! Wire frame vocabulary exchanged over the agent and dashboard WebSocket
//! endpoints.
//!
//! JSON objects, one per WebSocket text frame. `ClientFrame` is what the
//! Connection Manager receives; `ServerFrame` is what it sends. Both are
//! tagged on `type` so a single `serde_json::from_str` dispatches to the
//! right variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        subject: String,
    },
    Unsubscribe {
        subject: String,
    },
    Publish {
        subject: String,
        data: Value,
    },
    Heartbeat {
        #[serde(default)]
        data: Option<Value>,
    },
    Ping {},
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome {
        principal_id: String,
        node_id: String,
        server_time: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscribed_subjects: Option<Vec<String>>,
    },
    Subscribed {
        subject: String,
    },
    Unsubscribed {
        subject: String,
    },
    Published {
        subject: String,
    },
    Message {
        subject: String,
        data: Value,
        timestamp: String,
    },
    HeartbeatAck {
        timestamp: String,
    },
    Pong {},
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    /// Builds the `{type:"error", code, message}` frame for a `GatewayError`.
    pub fn error(err: &crate::error::GatewayError) -> Self {
        ServerFrame::Error {
            code: err.frame_code().to_string(),
            message: err.to_string(),
        }
    }

    /// Builds the `{type:"error", code:"unknown_type"}` frame for an
    /// unrecognized client frame `type`; non-fatal, connection stays open.
    pub fn unknown_type() -> Self {
        ServerFrame::Error {
            code: "unknown_type".to_string(),
            message: "unrecognized frame type".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_frame_round_trips() {
        let frame = ClientFrame::Subscribe {
            subject: "tenant.t1.channel.chat".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe");
        let back: ClientFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn publish_frame_carries_opaque_data() {
        let raw =
            json!({"type": "publish", "subject": "tenant.t1.channel.chat", "data": {"m": "hi"}});
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::Publish { subject, data } => {
                assert_eq!(subject, "tenant.t1.channel.chat");
                assert_eq!(data["m"], "hi");
            }
            _ => panic!("expected Publish"),
        }
    }

    #[test]
    fn unknown_client_type_fails_to_deserialize_as_protocol_error() {
        let raw = json!({"type": "frobnicate"});
        let result: Result<ClientFrame, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn message_frame_serializes_expected_shape() {
        let frame = ServerFrame::Message {
            subject: "tenant.t1.channel.chat".into(),
            data: json!({"m": "hi"}),
            timestamp: "2026-07-31T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["data"]["m"], "hi");
    }

    #[test]
    fn welcome_omits_subscribed_subjects_when_absent() {
        let frame = ServerFrame::Welcome {
            principal_id: "A1".into(),
            node_id: "N1".into(),
            server_time: "2026-07-31T00:00:00Z".into(),
            subscribed_subjects: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("subscribed_subjects").is_none());
    }
}
