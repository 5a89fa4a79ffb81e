//! WebSocket transport bridging socket frames to the gateway

mod handler;

pub use handler::{ws_handler, WsQuery};
