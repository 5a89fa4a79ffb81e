use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use crate::config::GatewayConfig;
use crate::metrics::MessageMetrics;
use crate::registry::{ConnectionRecord, ConnectionRegistry, TouchFailureMonitor};

use super::handlers::{HandlerError, HandlerRegistry, MessageContext};
use super::message::{GatewayResponse, InboundMessage};

/// Server-side entry point for transport events.
///
/// Each connection moves OPEN (connect) -> MESSAGE* -> CLOSED (disconnect).
/// Events for different connections are handled independently; nothing here
/// takes a lock spanning more than one connection.
pub struct TransportGateway {
    registry: Arc<dyn ConnectionRegistry>,
    handlers: Arc<HandlerRegistry>,
    touch_monitor: TouchFailureMonitor,
    config: GatewayConfig,
}

impl TransportGateway {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<dyn ConnectionRegistry>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            touch_monitor: TouchFailureMonitor::new(config.touch_failure_alert_threshold),
            registry,
            handlers,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn touch_monitor(&self) -> &TouchFailureMonitor {
        &self.touch_monitor
    }

    /// Resolve the user id supplied at connect time, defaulting to the anonymous identity
    pub fn resolve_user_id(&self, user_id: Option<&str>) -> String {
        match user_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.config.anonymous_user_id.clone(),
        }
    }

    /// Record a newly opened connection.
    ///
    /// A failed write rejects the connection: an untracked live session would
    /// never be reclaimed.
    #[tracing::instrument(name = "gateway.connect", skip(self))]
    pub async fn on_connect(&self, connection_id: &str, user_id: Option<&str>) -> GatewayResponse {
        let user_id = self.resolve_user_id(user_id);
        let record = ConnectionRecord::connected(connection_id, user_id.clone());

        if let Err(e) = self.registry.put(&record).await {
            tracing::error!(
                connection_id = %connection_id,
                user_id = %user_id,
                error = %e,
                "Failed to register connection"
            );
            return GatewayResponse::server_error(connection_id);
        }

        tracing::info!(connection_id = %connection_id, user_id = %user_id, "Connection registered");
        GatewayResponse::Connected {
            connection_id: connection_id.to_string(),
            user_id,
        }
    }

    /// Drop a closed connection. Always succeeds towards the transport.
    #[tracing::instrument(name = "gateway.disconnect", skip(self))]
    pub async fn on_disconnect(&self, connection_id: &str) -> GatewayResponse {
        self.handlers.notify_disconnect(connection_id);

        if let Err(e) = self.registry.remove(connection_id).await {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Failed to remove connection record"
            );
        } else {
            tracing::info!(connection_id = %connection_id, "Connection unregistered");
        }

        GatewayResponse::Disconnected {
            connection_id: connection_id.to_string(),
        }
    }

    /// Handle one inbound frame. Never panics and never returns an error:
    /// every failure becomes a typed response for the transport.
    #[tracing::instrument(name = "gateway.message", skip(self, raw), fields(bytes = raw.len()))]
    pub async fn on_message(&self, connection_id: &str, raw: &str) -> GatewayResponse {
        if raw.len() > self.config.max_message_bytes {
            MessageMetrics::record_invalid();
            return GatewayResponse::InvalidMessage {
                connection_id: connection_id.to_string(),
                reason: format!(
                    "Message exceeds {} bytes",
                    self.config.max_message_bytes
                ),
            };
        }

        let parsed = InboundMessage::parse(raw);
        self.record_activity(connection_id).await;

        let message = match parsed {
            Ok(message) => message,
            Err(reason) => {
                MessageMetrics::record_invalid();
                tracing::debug!(connection_id = %connection_id, reason = %reason, "Invalid message");
                return GatewayResponse::InvalidMessage {
                    connection_id: connection_id.to_string(),
                    reason,
                };
            }
        };

        self.dispatch(connection_id, message).await
    }

    /// Best-effort `last_activity` update; failures are logged and counted only
    async fn record_activity(&self, connection_id: &str) {
        match self.registry.touch(connection_id, Utc::now()).await {
            Ok(()) => self.touch_monitor.record_success(),
            Err(e) => {
                self.touch_monitor.record_failure(connection_id, &e);
            }
        }
    }

    async fn dispatch(&self, connection_id: &str, message: InboundMessage) -> GatewayResponse {
        let Some(handler) = self.handlers.get(&message.message_type) else {
            MessageMetrics::record_unknown_type();
            tracing::warn!(
                connection_id = %connection_id,
                message_type = %message.message_type,
                "Unknown message type"
            );
            return GatewayResponse::UnknownMessageType {
                connection_id: connection_id.to_string(),
                received_type: message.message_type,
            };
        };

        MessageMetrics::record_received(&message.message_type);
        let ctx = MessageContext {
            connection_id: connection_id.to_string(),
            message_type: message.message_type.clone(),
            received_at: Utc::now(),
        };

        let outcome = AssertUnwindSafe(handler.handle(&ctx, &message.body))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(body)) => GatewayResponse::Reply {
                connection_id: ctx.connection_id,
                message_type: ctx.message_type,
                body,
            },
            Ok(Err(HandlerError::Rejected { code, message })) => GatewayResponse::HandlerError {
                connection_id: ctx.connection_id,
                message_type: ctx.message_type,
                code,
                message,
            },
            Ok(Err(HandlerError::Internal(error))) => {
                MessageMetrics::record_dispatch_error();
                tracing::error!(
                    connection_id = %connection_id,
                    message_type = %ctx.message_type,
                    error = %error,
                    "Message handler failed"
                );
                GatewayResponse::server_error(connection_id)
            }
            Err(panic) => {
                MessageMetrics::record_dispatch_error();
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    connection_id = %connection_id,
                    message_type = %ctx.message_type,
                    panic = %detail,
                    "Message handler panicked"
                );
                GatewayResponse::server_error(connection_id)
            }
        }
    }
}
