//! Axum server binding the broadcast bridge to the network.
//!
//! `POST /broadcast` queues events, `GET /ws` upgrades subscribers, and
//! `GET /health` reports the live connection count. CORS preflights are
//! answered for the event source's cross-origin POSTs.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, Request, State, WebSocketUpgrade,
    },
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tower_http::cors::CorsLayer;

use crate::batch::PendingBatch;
use crate::config::BridgeConfig;
use crate::connections::{ConnectionRegistry, WRITER_QUEUE_CAPACITY};
use crate::protocol::{encode_flush, welcome_message, Envelope};

/// Submissions larger than this are rejected by the body limit layer.
const MAX_BODY_BYTES: usize = 1_000_000;

/// One broadcast bridge instance: owns its connection set and pending
/// batch, so tests can run several bridges side by side in one process.
pub struct Bridge {
    config: BridgeConfig,
    registry: ConnectionRegistry,
    batch: Mutex<PendingBatch>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let low_cap = config.low_priority_cap;
        Arc::new(Self {
            config,
            registry: ConnectionRegistry::new(),
            batch: Mutex::new(PendingBatch::new(low_cap)),
        })
    }

    /// Queue a decoded submission and make sure a flush is scheduled.
    ///
    /// Returns the number of currently connected subscribers; advisory
    /// only, since delivery happens on the flush timer without acks.
    pub async fn submit(self: &Arc<Self>, body: Value) -> usize {
        let envelope = Envelope::from_submission(body);
        let schedule = {
            let mut batch = self.batch.lock().await;
            batch.push(envelope)
        };
        if schedule {
            self.schedule_flush();
        }
        self.registry.count().await
    }

    fn schedule_flush(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(bridge.config.flush_delay).await;
            bridge.flush().await;
        });
    }

    /// Drain the pending batch and offer it to every writable connection.
    async fn flush(self: &Arc<Self>) {
        let (items, reschedule) = {
            let mut batch = self.batch.lock().await;
            batch.drain()
        };
        if reschedule {
            // Low-priority backlog remains; keep the timer chain going.
            self.schedule_flush();
        }

        if let Some(text) = encode_flush(&items) {
            let delivered = self.registry.fan_out(&text).await;
            log::debug!(
                "Flushed {} event(s) to {} subscriber(s)",
                items.len(),
                delivered
            );
        }
    }

    /// Start the periodic liveness sweep for this bridge.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bridge.config.heartbeat_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let reaped = bridge.registry.sweep().await;
                if reaped > 0 {
                    log::info!(
                        "Heartbeat sweep reaped {} connection(s), {} remaining",
                        reaped,
                        bridge.registry.count().await
                    );
                }
            }
        });
    }

    pub async fn client_count(&self) -> usize {
        self.registry.count().await
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Build the HTTP surface for one bridge instance.
pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route(
            "/broadcast",
            post(broadcast_handler).layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .fallback(fallback_handler)
        .layer(CorsLayer::permissive())
        // Outermost, so it rewrites the CORS layer's preflight answer too:
        // every OPTIONS request, routed or not, is answered with 204.
        .layer(middleware::from_fn(options_no_content))
        .with_state(bridge)
}

async fn options_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// Serve the bridge on an already-bound listener.
pub async fn serve(bridge: Arc<Bridge>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(bridge)).await
}

async fn broadcast_handler(
    State(bridge): State<Arc<Bridge>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    // An empty body is treated as an empty object, like the original relay.
    let parsed: Result<Value, _> = if body.is_empty() {
        Ok(json!({}))
    } else {
        serde_json::from_slice(&body)
    };

    match parsed {
        Ok(value) => {
            let delivered = bridge.submit(value).await;
            (
                StatusCode::OK,
                Json(json!({"success": true, "delivered": delivered})),
            )
        }
        Err(err) => {
            log::warn!("Rejected broadcast with malformed JSON: {}", err);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "Invalid JSON payload"})),
            )
        }
    }
}

async fn health_handler(State(bridge): State<Arc<Bridge>>) -> Json<Value> {
    Json(json!({"status": "ok", "clients": bridge.client_count().await}))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(bridge): State<Arc<Bridge>>,
) -> impl IntoResponse {
    let client_id = headers
        .get("x-client-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, bridge, client_id))
}

/// Drive one subscriber connection until it closes or is replaced.
async fn handle_socket(socket: WebSocket, bridge: Arc<Bridge>, client_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WRITER_QUEUE_CAPACITY);
    let (closed_tx, mut closed_rx) = watch::channel(false);

    let token = bridge
        .registry
        .register(&client_id, tx.clone(), closed_tx)
        .await;
    log::info!(
        "Client {} connected ({} total)",
        client_id,
        bridge.registry.count().await
    );

    if let Ok(greeting) = serde_json::to_string(&welcome_message(&client_id)) {
        let _ = tx.try_send(Message::Text(greeting.into()));
    }

    // Writer task: drains this connection's queue. A queued Close frame
    // (replacement or heartbeat reap) ends the task after it is sent.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                // Any inbound frame (text, ping, pong) confirms liveness.
                Some(Ok(_)) => bridge.registry.mark_alive(&client_id, token).await,
                Some(Err(_)) => break,
            },
            // Eviction (replacement or heartbeat reap) ends the connection
            // even if the queued Close frame never fit in the writer queue.
            _ = closed_rx.changed() => break,
        }
    }

    if bridge.registry.remove(&client_id, token).await {
        log::info!(
            "Client {} disconnected ({} remaining)",
            client_id,
            bridge.registry.count().await
        );
    }
    send_task.abort();
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_reports_connection_count_not_delivery() {
        let bridge = Bridge::new(BridgeConfig::default());
        let delivered = bridge.submit(json!({"data": {"id": 1}})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn flush_clears_pending_batch() {
        let bridge = Bridge::new(BridgeConfig::default());
        bridge.submit(json!({"type": "rfid-log", "data": {"id": 1}})).await;
        bridge.submit(json!({"type": "misc", "data": {"id": 2}})).await;
        bridge.flush().await;
        assert!(bridge.batch.lock().await.is_empty());
    }
}
