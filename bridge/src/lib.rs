//! Broadcast bridge for the RFID access-control dashboard.
//!
//! Accepts JSON events from the registry/log backend over HTTP, batches
//! them by priority, and fans them out to every live WebSocket subscriber.
//! Holds no durable state: a restart drops pending batches and connections,
//! and subscribers recover through reconnect plus their polling fallback.

pub mod batch;
pub mod config;
pub mod connections;
pub mod protocol;
pub mod server;

pub use config::BridgeConfig;
pub use server::{router, serve, Bridge};
