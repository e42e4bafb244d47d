//! Reconnecting WebSocket client for bridge push updates.
//!
//! A single control loop owns the socket and drives the
//! `Connecting → Connected → Disconnected|Errored → Connecting` cycle.
//! Consumers observe the state through a watch channel; a deliberate
//! shutdown is terminal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::backoff::Backoff;
use crate::dedup::RecentFingerprints;
use crate::normalize::normalize_log_entry;
use crate::store::LogStore;

/// Connection state visible to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

/// Settings for one live-updates client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:9443/ws`.
    pub url: String,
    /// Identity sent in the `x-client-id` header; `None` lets the bridge
    /// generate one per connection.
    pub client_id: Option<String>,
    /// An attempt that neither opens nor errors within this window is torn
    /// down and treated as failed.
    pub connect_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub dedup_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9443/ws".to_string(),
            client_id: None,
            connect_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(30000),
            dedup_window: Duration::from_secs(5),
        }
    }
}

/// Handle to a running client task.
pub struct LiveClient {
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl LiveClient {
    /// Start the control loop; log events land in `store`.
    pub fn spawn(config: ClientConfig, store: Arc<LogStore>) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_client(config, store, status_tx, shutdown_rx));
        Self {
            status_rx,
            shutdown_tx,
            task,
        }
    }

    /// Watch the connection state, e.g. to drive a status indicator.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Deliberate shutdown; no reconnect is scheduled afterwards.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

enum ConnectionOutcome {
    /// Deliberate shutdown requested.
    Shutdown,
    /// Peer closed or the stream ended.
    Closed,
    /// Connect failure, connect timeout, or transport error.
    Failed,
}

async fn run_client(
    config: ClientConfig,
    store: Arc<LogStore>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.backoff_base, config.backoff_cap);
    let mut dedup = RecentFingerprints::new(config.dedup_window);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let _ = status_tx.send(ConnectionStatus::Connecting);

        let outcome = attempt_connection(
            &config,
            &store,
            &status_tx,
            &mut shutdown_rx,
            &mut backoff,
            &mut dedup,
        )
        .await;

        match outcome {
            ConnectionOutcome::Shutdown => break,
            ConnectionOutcome::Closed => {
                let _ = status_tx.send(ConnectionStatus::Disconnected);
            }
            ConnectionOutcome::Failed => {
                let _ = status_tx.send(ConnectionStatus::Errored);
            }
        }

        let delay = backoff.next_delay();
        log::debug!(
            "Reconnecting to {} in {:?} (attempt {})",
            config.url,
            delay,
            backoff.attempt()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    let _ = status_tx.send(ConnectionStatus::Disconnected);
}

async fn attempt_connection(
    config: &ClientConfig,
    store: &LogStore,
    status_tx: &watch::Sender<ConnectionStatus>,
    shutdown_rx: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
    dedup: &mut RecentFingerprints,
) -> ConnectionOutcome {
    let mut request = match config.url.as_str().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            log::error!("Invalid live-updates URL {}: {}", config.url, err);
            return ConnectionOutcome::Failed;
        }
    };
    if let Some(id) = &config.client_id {
        match id.parse() {
            Ok(value) => {
                request.headers_mut().insert("x-client-id", value);
            }
            Err(_) => log::warn!("Client id {:?} is not a valid header value", id),
        }
    }

    let connect = tokio_tungstenite::connect_async(request);
    let mut stream = tokio::select! {
        result = tokio::time::timeout(config.connect_timeout, connect) => match result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                log::warn!("WebSocket connect to {} failed: {}", config.url, err);
                return ConnectionOutcome::Failed;
            }
            Err(_) => {
                log::warn!(
                    "WebSocket connect to {} timed out after {:?}",
                    config.url,
                    config.connect_timeout
                );
                return ConnectionOutcome::Failed;
            }
        },
        _ = shutdown_rx.changed() => return ConnectionOutcome::Shutdown,
    };

    backoff.reset();
    let _ = status_tx.send(ConnectionStatus::Connected);
    log::info!("Live updates connected to {}", config.url);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_message(text.as_str(), dedup, store).await;
                }
                Some(Ok(Message::Close(_))) | None => return ConnectionOutcome::Closed,
                // Pings are answered by the transport; pongs need no action.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log::warn!("Live updates stream error: {}", err);
                    return ConnectionOutcome::Failed;
                }
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = stream.close(None).await;
                    return ConnectionOutcome::Shutdown;
                }
            }
        }
    }
}

/// Deduplicate, unwrap batches, and route recognized events to the store.
pub(crate) async fn handle_message(raw: &str, dedup: &mut RecentFingerprints, store: &LogStore) {
    if !dedup.observe(raw, Instant::now()) {
        log::debug!("Dropped duplicate live update");
        return;
    }

    let payload: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Failed to parse live update payload: {}", err);
            return;
        }
    };

    if payload.get("type").and_then(Value::as_str) == Some("batch") {
        if let Some(items) = payload.get("data").and_then(Value::as_array) {
            for item in items {
                route_event(item, store).await;
            }
        }
        return;
    }

    route_event(&payload, store).await;
}

async fn route_event(event: &Value, store: &LogStore) {
    match event.get("type").and_then(Value::as_str) {
        Some("rfid-log") => {
            if let Some(data) = event.get("data") {
                store.upsert_log(normalize_log_entry(data)).await;
            }
        }
        Some("welcome") => {
            log::debug!(
                "Bridge welcome: {}",
                event.get("data").cloned().unwrap_or(Value::Null)
            );
        }
        other => log::debug!("Ignoring live update type {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_dedup() -> RecentFingerprints {
        RecentFingerprints::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn duplicate_delivery_mutates_cache_once() {
        let store = LogStore::new(50);
        let mut dedup = new_dedup();
        let raw = json!({
            "type": "rfid-log",
            "data": {"id": 42, "rfid_data": "AA:BB:CC:DD", "rfid_status": true},
            "receivedAt": "2025-01-15T08:30:00.000Z",
        })
        .to_string();

        handle_message(&raw, &mut dedup, &store).await;
        handle_message(&raw, &mut dedup, &store).await;

        let logs = store.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, 42);
    }

    #[tokio::test]
    async fn batch_envelope_is_unwrapped() {
        let store = LogStore::new(50);
        let mut dedup = new_dedup();
        let raw = json!({
            "type": "batch",
            "count": 2,
            "data": [
                {"type": "rfid-log", "data": {"id": 1, "rfid_data": "AA"}},
                {"type": "rfid-log", "data": {"id": 2, "rfid_data": "BB"}},
            ],
        })
        .to_string();

        handle_message(&raw, &mut dedup, &store).await;

        let logs = store.logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, 1);
    }

    #[tokio::test]
    async fn unrecognized_types_are_ignored() {
        let store = LogStore::new(50);
        let mut dedup = new_dedup();
        handle_message(
            &json!({"type": "welcome", "data": {"clientId": "x"}}).to_string(),
            &mut dedup,
            &store,
        )
        .await;
        handle_message(
            &json!({"type": "registration-updated", "data": {"id": 1}}).to_string(),
            &mut dedup,
            &store,
        )
        .await;
        assert_eq!(store.log_count().await, 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_quietly() {
        let store = LogStore::new(50);
        let mut dedup = new_dedup();
        handle_message("{not json", &mut dedup, &store).await;
        assert_eq!(store.log_count().await, 0);
    }
}
