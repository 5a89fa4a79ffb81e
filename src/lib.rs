// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;

// Server side: registry, gateway and reclamation
pub mod gateway;
pub mod registry;
pub mod tasks;

// Client side: subscription multiplexing and status aggregation
pub mod status;
pub mod subscription;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;
