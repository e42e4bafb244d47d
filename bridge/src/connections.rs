//! Live subscriber connection registry.
//!
//! Each WebSocket gets a dedicated writer queue; fan-out never awaits a
//! peer. The registry enforces at most one connection per declared client
//! identity and runs the liveness bookkeeping for the heartbeat sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::{mpsc, watch, Mutex};

/// Writer queue depth per connection. A peer that falls this far behind
/// simply misses batches until it drains or is reaped.
pub const WRITER_QUEUE_CAPACITY: usize = 256;

struct ConnectionHandle {
    /// Distinguishes a replaced connection from its successor under the
    /// same client id, so the old socket's cleanup cannot evict the new one.
    token: u64,
    tx: mpsc::Sender<Message>,
    /// Eviction signal observed by the connection's read loop. The queued
    /// Close frame is best-effort; this is not, so a peer with a full
    /// writer queue still gets torn down.
    closed: watch::Sender<bool>,
    alive: bool,
}

/// Set of live subscriber connections, keyed by client id.
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, ConnectionHandle>>,
    next_token: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a connection under `client_id`, returning its token.
    ///
    /// An existing connection under the same id is closed and replaced, so
    /// the active count is unchanged by a reconnect under a stable identity.
    pub async fn register(
        &self,
        client_id: &str,
        tx: mpsc::Sender<Message>,
        closed: watch::Sender<bool>,
    ) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle {
            token,
            tx,
            closed,
            alive: true,
        };

        let mut conns = self.inner.lock().await;
        if let Some(previous) = conns.insert(client_id.to_string(), handle) {
            log::info!("Replacing existing connection for client {}", client_id);
            let _ = previous.tx.try_send(Message::Close(None));
            let _ = previous.closed.send(true);
        }
        token
    }

    /// Remove a connection, but only if it still owns its registry slot.
    pub async fn remove(&self, client_id: &str, token: u64) -> bool {
        let mut conns = self.inner.lock().await;
        match conns.get(client_id) {
            Some(handle) if handle.token == token => {
                conns.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Mark a connection alive after any inbound frame.
    pub async fn mark_alive(&self, client_id: &str, token: u64) {
        let mut conns = self.inner.lock().await;
        if let Some(handle) = conns.get_mut(client_id) {
            if handle.token == token {
                handle.alive = true;
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Offer identical serialized text to every writable connection.
    ///
    /// Connections with a full queue miss this batch; connections whose
    /// writer has gone away are evicted. Returns the number of queues the
    /// message was handed to.
    pub async fn fan_out(&self, text: &str) -> usize {
        let mut conns = self.inner.lock().await;
        let mut delivered = 0;
        let mut dead: Vec<String> = Vec::new();

        for (client_id, handle) in conns.iter() {
            match handle.tx.try_send(Message::Text(text.to_string().into())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("Client {} writer queue full, skipping batch", client_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(client_id.clone());
                }
            }
        }

        for client_id in dead {
            conns.remove(&client_id);
            log::info!("Evicted closed connection {}", client_id);
        }
        delivered
    }

    /// Heartbeat pass: reap connections that produced no inbound traffic
    /// since the previous sweep, then mark the survivors unconfirmed and
    /// probe them. Returns the number of reaped connections.
    pub async fn sweep(&self) -> usize {
        let mut conns = self.inner.lock().await;
        let mut reaped = 0;

        conns.retain(|client_id, handle| {
            if handle.alive {
                true
            } else {
                log::warn!("Terminating unresponsive client {}", client_id);
                let _ = handle.tx.try_send(Message::Close(None));
                let _ = handle.closed.send(true);
                reaped += 1;
                false
            }
        });

        for handle in conns.values_mut() {
            handle.alive = false;
            let _ = handle.tx.try_send(Message::Ping(Vec::new().into()));
        }
        reaped
    }
}
