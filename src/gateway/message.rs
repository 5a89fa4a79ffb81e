use serde::Serialize;
use serde_json::Value;

/// Built-in inbound message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SessionStart,
    SessionData,
    SessionEnd,
    TextMessage,
    LivenessPing,
    /// Short alias of `liveness-ping`
    Ping,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::SessionStart,
        MessageType::SessionData,
        MessageType::SessionEnd,
        MessageType::TextMessage,
        MessageType::LivenessPing,
        MessageType::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session-start",
            Self::SessionData => "session-data",
            Self::SessionEnd => "session-end",
            Self::TextMessage => "text-message",
            Self::LivenessPing => "liveness-ping",
            Self::Ping => "ping",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed inbound frame: the `type` discriminator plus the full JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_type: String,
    pub body: Value,
}

impl InboundMessage {
    /// Parse a raw text frame. The frame must be a JSON object with a string `type`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let body: Value = serde_json::from_str(raw).map_err(|e| format!("Invalid JSON: {}", e))?;

        let message_type = match body.get("type") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            Some(_) => return Err("Field 'type' must be a non-empty string".to_string()),
            None if body.is_object() => return Err("Missing field 'type'".to_string()),
            None => return Err("Message must be a JSON object".to_string()),
        };

        Ok(Self { message_type, body })
    }
}

/// Result of handling one transport event, returned to the transport.
///
/// Every variant carries the originating connection id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum GatewayResponse {
    Connected {
        connection_id: String,
        user_id: String,
    },
    Disconnected {
        connection_id: String,
    },
    Reply {
        connection_id: String,
        message_type: String,
        body: Value,
    },
    UnknownMessageType {
        connection_id: String,
        received_type: String,
    },
    InvalidMessage {
        connection_id: String,
        reason: String,
    },
    HandlerError {
        connection_id: String,
        message_type: String,
        code: String,
        message: String,
    },
    ServerError {
        connection_id: String,
        message: String,
    },
}

impl GatewayResponse {
    pub fn connection_id(&self) -> &str {
        match self {
            Self::Connected { connection_id, .. }
            | Self::Disconnected { connection_id }
            | Self::Reply { connection_id, .. }
            | Self::UnknownMessageType { connection_id, .. }
            | Self::InvalidMessage { connection_id, .. }
            | Self::HandlerError { connection_id, .. }
            | Self::ServerError { connection_id, .. } => connection_id,
        }
    }

    /// Transport status code: 200 handled, 400 rejected, 500 server failure
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Connected { .. } | Self::Disconnected { .. } | Self::Reply { .. } => 200,
            Self::UnknownMessageType { .. }
            | Self::InvalidMessage { .. }
            | Self::HandlerError { .. } => 400,
            Self::ServerError { .. } => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code() == 200
    }

    pub fn server_error(connection_id: impl Into<String>) -> Self {
        Self::ServerError {
            connection_id: connection_id.into(),
            message: "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extracts_type() {
        let msg = InboundMessage::parse(r#"{"type":"text-message","text":"hi"}"#).unwrap();
        assert_eq!(msg.message_type, "text-message");
        assert_eq!(msg.body["text"], "hi");
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(InboundMessage::parse("not json").is_err());
        assert!(InboundMessage::parse(r#"{"text":"no type"}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":42}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":""}"#).is_err());
        assert!(InboundMessage::parse(r#"["type"]"#).is_err());
    }

    #[test]
    fn test_unknown_type_serializes_with_connection_id() {
        let response = GatewayResponse::UnknownMessageType {
            connection_id: "c1".to_string(),
            received_type: "teleport".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            json!({"type": "unknown-message-type", "connectionId": "c1", "receivedType": "teleport"})
        );
        assert_eq!(response.status_code(), 400);
    }

    #[test]
    fn test_status_codes() {
        let ok = GatewayResponse::Disconnected {
            connection_id: "c1".to_string(),
        };
        assert!(ok.is_success());
        assert_eq!(GatewayResponse::server_error("c1").status_code(), 500);
        assert_eq!(GatewayResponse::server_error("c1").connection_id(), "c1");
    }

    #[test]
    fn test_builtin_type_names() {
        let names: Vec<&str> = MessageType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "session-start",
                "session-data",
                "session-end",
                "text-message",
                "liveness-ping",
                "ping"
            ]
        );
    }
}
