//! Transport gateway
//!
//! Turns transport events (connect, message, disconnect) into registry
//! updates and handler dispatch. Every event produces a [`GatewayResponse`]
//! for the transport; no event is allowed to fail by throwing.

mod handlers;
mod message;
mod transport;

pub use handlers::{
    HandlerError, HandlerRegistry, MessageContext, MessageHandler, PingHandler, SessionAction,
    SessionHandler, SessionTable, TextMessageHandler,
};
pub use message::{GatewayResponse, InboundMessage, MessageType};
pub use transport::TransportGateway;
