//! Message handlers dispatched by `type`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::{json, Value};
use uuid::Uuid;

use super::message::MessageType;

/// Per-message context passed to handlers
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub connection_id: String,
    pub message_type: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message was understood but refused; reported back to the client
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// The handler failed; reported as a generic server error
    #[error("Handler failed: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Handles one message type. Returns the reply body sent back on the transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &MessageContext, message: &Value) -> Result<Value, HandlerError>;

    /// Release any state owned by a connection that has gone away
    fn on_disconnect(&self, _connection_id: &str) {}
}

/// Handlers keyed by message type name
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handler for every [`MessageType`]
    pub fn with_defaults() -> Self {
        let sessions = Arc::new(SessionTable::default());
        let ping: Arc<dyn MessageHandler> = Arc::new(PingHandler);
        let mut registry = Self::new();
        registry
            .register(MessageType::LivenessPing.as_str(), ping.clone())
            .register(MessageType::Ping.as_str(), ping)
            .register(
                MessageType::SessionStart.as_str(),
                Arc::new(SessionHandler::new(SessionAction::Start, sessions.clone())),
            )
            .register(
                MessageType::SessionData.as_str(),
                Arc::new(SessionHandler::new(SessionAction::Data, sessions.clone())),
            )
            .register(
                MessageType::SessionEnd.as_str(),
                Arc::new(SessionHandler::new(SessionAction::End, sessions)),
            )
            .register(MessageType::TextMessage.as_str(), Arc::new(TextMessageHandler));
        registry
    }

    /// Register (or replace) the handler for a message type
    pub fn register(
        &mut self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> &mut Self {
        self.handlers.insert(message_type.into(), handler);
        self
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn notify_disconnect(&self, connection_id: &str) {
        for handler in self.handlers.values() {
            handler.on_disconnect(connection_id);
        }
    }
}

/// Liveness ping
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, ctx: &MessageContext, _message: &Value) -> Result<Value, HandlerError> {
        Ok(json!({ "type": "pong", "timestamp": ctx.received_at.timestamp_millis() }))
    }
}

/// Text message acknowledgement
pub struct TextMessageHandler;

#[async_trait]
impl MessageHandler for TextMessageHandler {
    async fn handle(&self, ctx: &MessageContext, message: &Value) -> Result<Value, HandlerError> {
        let text = message
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::rejected("INVALID_PAYLOAD", "Field 'text' is required"))?;

        tracing::debug!(
            connection_id = %ctx.connection_id,
            length = text.len(),
            "Text message received"
        );

        Ok(json!({ "type": "message-received", "length": text.chars().count() }))
    }
}

#[derive(Debug, Clone)]
struct SessionState {
    connection_id: String,
    started_at: DateTime<Utc>,
    chunks: u64,
}

/// Streaming sessions opened by connections, keyed by session id
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, SessionState>,
}

impl SessionTable {
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn release_connection(&self, connection_id: &str) {
        self.sessions
            .retain(|_, session| session.connection_id != connection_id);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SessionAction {
    Start,
    Data,
    End,
}

/// Handles session-start, session-data and session-end against a shared table
pub struct SessionHandler {
    action: SessionAction,
    sessions: Arc<SessionTable>,
}

impl SessionHandler {
    pub fn new(action: SessionAction, sessions: Arc<SessionTable>) -> Self {
        Self { action, sessions }
    }

    fn session_id(message: &Value) -> Option<&str> {
        message.get("sessionId").and_then(Value::as_str)
    }

    fn not_found(session_id: &str) -> HandlerError {
        HandlerError::rejected("SESSION_NOT_FOUND", format!("Unknown session: {}", session_id))
    }
}

#[async_trait]
impl MessageHandler for SessionHandler {
    async fn handle(&self, ctx: &MessageContext, message: &Value) -> Result<Value, HandlerError> {
        match self.action {
            SessionAction::Start => {
                let session_id = Self::session_id(message)
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());

                let state = SessionState {
                    connection_id: ctx.connection_id.clone(),
                    started_at: ctx.received_at,
                    chunks: 0,
                };
                match self.sessions.sessions.entry(session_id.clone()) {
                    Entry::Occupied(mut existing) => {
                        if existing.get().connection_id != ctx.connection_id {
                            return Err(HandlerError::rejected(
                                "SESSION_CONFLICT",
                                format!("Session {} belongs to another connection", session_id),
                            ));
                        }
                        existing.insert(state);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(state);
                    }
                }
                tracing::info!(
                    connection_id = %ctx.connection_id,
                    session_id = %session_id,
                    "Session started"
                );
                Ok(json!({ "type": "session-started", "sessionId": session_id }))
            }
            SessionAction::Data => {
                let session_id = Self::session_id(message).ok_or_else(|| {
                    HandlerError::rejected("INVALID_PAYLOAD", "Field 'sessionId' is required")
                })?;

                let mut session = self
                    .sessions
                    .sessions
                    .get_mut(session_id)
                    .filter(|s| s.connection_id == ctx.connection_id)
                    .ok_or_else(|| Self::not_found(session_id))?;
                session.chunks += 1;

                Ok(json!({
                    "type": "session-data-received",
                    "sessionId": session_id,
                    "sequence": session.chunks,
                }))
            }
            SessionAction::End => {
                let session_id = Self::session_id(message).ok_or_else(|| {
                    HandlerError::rejected("INVALID_PAYLOAD", "Field 'sessionId' is required")
                })?;

                let (_, session) = self
                    .sessions
                    .sessions
                    .remove_if(session_id, |_, s| s.connection_id == ctx.connection_id)
                    .ok_or_else(|| Self::not_found(session_id))?;

                let duration_ms = (ctx.received_at - session.started_at).num_milliseconds();
                tracing::info!(
                    connection_id = %ctx.connection_id,
                    session_id = %session_id,
                    chunks = session.chunks,
                    duration_ms,
                    "Session ended"
                );
                Ok(json!({
                    "type": "session-ended",
                    "sessionId": session_id,
                    "chunks": session.chunks,
                    "durationMs": duration_ms,
                }))
            }
        }
    }

    fn on_disconnect(&self, connection_id: &str) {
        self.sessions.release_connection(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(connection_id: &str, message_type: MessageType) -> MessageContext {
        MessageContext {
            connection_id: connection_id.to_string(),
            message_type: message_type.as_str().to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_defaults_cover_builtin_types() {
        let registry = HandlerRegistry::with_defaults();
        for message_type in MessageType::ALL {
            assert!(registry.get(message_type.as_str()).is_some());
        }
        assert!(registry.get("teleport").is_none());
        assert_eq!(registry.message_types().len(), MessageType::ALL.len());
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        let reply = PingHandler
            .handle(&ctx("c1", MessageType::Ping), &json!({"type": "ping"}))
            .await
            .unwrap();
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn test_text_message_requires_text() {
        let c = ctx("c1", MessageType::TextMessage);
        let reply = TextMessageHandler
            .handle(&c, &json!({"type": "text-message", "text": "héllo"}))
            .await
            .unwrap();
        assert_eq!(reply["length"], 5);

        let err = TextMessageHandler
            .handle(&c, &json!({"type": "text-message"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected { ref code, .. } if code == "INVALID_PAYLOAD"));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let table = Arc::new(SessionTable::default());
        let start = SessionHandler::new(SessionAction::Start, table.clone());
        let data = SessionHandler::new(SessionAction::Data, table.clone());
        let end = SessionHandler::new(SessionAction::End, table.clone());

        let started = start
            .handle(&ctx("c1", MessageType::SessionStart), &json!({}))
            .await
            .unwrap();
        let session_id = started["sessionId"].as_str().unwrap().to_string();
        assert_eq!(table.active_sessions(), 1);

        for expected in 1..=2 {
            let reply = data
                .handle(
                    &ctx("c1", MessageType::SessionData),
                    &json!({"sessionId": session_id}),
                )
                .await
                .unwrap();
            assert_eq!(reply["sequence"], expected);
        }

        let ended = end
            .handle(
                &ctx("c1", MessageType::SessionEnd),
                &json!({"sessionId": session_id}),
            )
            .await
            .unwrap();
        assert_eq!(ended["chunks"], 2);
        assert_eq!(table.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_data_from_other_connection_is_rejected() {
        let table = Arc::new(SessionTable::default());
        let start = SessionHandler::new(SessionAction::Start, table.clone());
        let data = SessionHandler::new(SessionAction::Data, table.clone());

        start
            .handle(&ctx("c1", MessageType::SessionStart), &json!({"sessionId": "s1"}))
            .await
            .unwrap();

        let err = data
            .handle(&ctx("c2", MessageType::SessionData), &json!({"sessionId": "s1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected { ref code, .. } if code == "SESSION_NOT_FOUND"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_of_same_session_has_one_owner() {
        let table = Arc::new(SessionTable::default());
        let start = Arc::new(SessionHandler::new(SessionAction::Start, table.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let start = start.clone();
                tokio::spawn(async move {
                    let c = ctx(&format!("c{}", i), MessageType::SessionStart);
                    start.handle(&c, &json!({"sessionId": "shared"})).await.is_ok()
                })
            })
            .collect();

        let mut owners = 0;
        for task in tasks {
            if task.await.unwrap() {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);
        assert_eq!(table.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_session_start_conflict_keeps_owner() {
        let table = Arc::new(SessionTable::default());
        let start = SessionHandler::new(SessionAction::Start, table.clone());
        let data = SessionHandler::new(SessionAction::Data, table.clone());

        start
            .handle(&ctx("c1", MessageType::SessionStart), &json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let err = start
            .handle(&ctx("c2", MessageType::SessionStart), &json!({"sessionId": "s1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected { ref code, .. } if code == "SESSION_CONFLICT"));

        assert!(data
            .handle(&ctx("c1", MessageType::SessionData), &json!({"sessionId": "s1"}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_releases_sessions() {
        let registry = HandlerRegistry::with_defaults();
        let start = registry.get("session-start").unwrap();
        let data = registry.get("session-data").unwrap();

        start
            .handle(&ctx("c1", MessageType::SessionStart), &json!({"sessionId": "s1"}))
            .await
            .unwrap();
        registry.notify_disconnect("c1");

        assert!(data
            .handle(&ctx("c1", MessageType::SessionData), &json!({"sessionId": "s1"}))
            .await
            .is_err());
    }
}
