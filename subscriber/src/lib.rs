//! Subscriber client for the RFID live-updates bridge.
//!
//! Maintains a WebSocket connection to the bridge with automatic
//! reconnect/backoff, deduplicates pushed messages, and keeps a bounded
//! newest-first cache of scan events. A polling reconciliation path
//! against the backend API keeps the cache converging even when the
//! bridge is down or messages are missed.

pub mod backoff;
pub mod client;
pub mod dedup;
pub mod error;
pub mod normalize;
pub mod poll;
pub mod store;

pub use client::{ClientConfig, ConnectionStatus, LiveClient};
pub use error::SubscriberError;
pub use normalize::{LogEntry, Registration};
pub use poll::{Poller, PollerConfig, PollerHandle};
pub use store::LogStore;
