//! Polling reconciliation against the registry/log HTTP API.
//!
//! Runs independently of the push channel: a full fetch at startup, then
//! cheap incremental rounds using an `after_id` cursor for logs, an
//! `updated_since` filter for registrations, and `If-None-Match`
//! validators so an unchanged backend answers 304 with no body. Merges
//! use the same last-write-wins-by-id rule as the push path, so the two
//! can race harmlessly.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::SubscriberError;
use crate::normalize::{normalize_log_entry, normalize_registration, LogEntry, Registration};
use crate::store::LogStore;

/// Settings for the reconciliation poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base URL of the backend API, e.g. `http://127.0.0.1:81/php-backend/api`.
    pub api_base_url: String,
    pub interval: Duration,
    pub log_limit: usize,
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:81/php-backend/api".to_string(),
            interval: Duration::from_secs(2),
            log_limit: 50,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Poller state: HTTP client plus the cursors and validators carried
/// between rounds.
pub struct Poller {
    client: reqwest::Client,
    config: PollerConfig,
    store: Arc<LogStore>,
    logs_etag: Option<String>,
    registered_etag: Option<String>,
    registered_cursor: Option<String>,
    online_tx: watch::Sender<bool>,
    online_rx: watch::Receiver<bool>,
}

impl Poller {
    pub fn new(config: PollerConfig, store: Arc<LogStore>) -> Self {
        let (online_tx, online_rx) = watch::channel(true);
        Self {
            client: reqwest::Client::new(),
            config,
            store,
            logs_etag: None,
            registered_etag: None,
            registered_cursor: None,
            online_tx,
            online_rx,
        }
    }

    /// Observe backend reachability, e.g. for an online/offline indicator.
    pub fn online(&self) -> watch::Receiver<bool> {
        self.online_rx.clone()
    }

    /// One reconciliation round. `force_full` drops the cursors and
    /// refetches everything (used at startup and after failures).
    pub async fn poll_once(&mut self, force_full: bool) -> Result<(), SubscriberError> {
        let result = match self.fetch_logs(force_full).await {
            Ok(()) => self.fetch_registrations(force_full).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(()) => {
                let _ = self.online_tx.send(true);
            }
            Err(err) => {
                log::warn!("Reconciliation poll failed: {}", err);
                if force_full {
                    self.logs_etag = None;
                    self.registered_etag = None;
                    self.registered_cursor = None;
                }
                let _ = self.online_tx.send(false);
            }
        }
        result
    }

    /// Start the poll loop: a full fetch, then incremental rounds on the
    /// configured interval until shutdown.
    pub fn spawn(mut self) -> PollerHandle {
        let online_rx = self.online_rx.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let _ = self.poll_once(true).await;
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = self.poll_once(false).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        PollerHandle {
            online_rx,
            shutdown_tx,
            task,
        }
    }

    async fn fetch_logs(&mut self, force_full: bool) -> Result<(), SubscriberError> {
        let after_id = if force_full {
            0
        } else {
            self.store.latest_log_id().await
        };

        let mut request = self
            .client
            .get(format!("{}/get_logs.php", self.config.api_base_url))
            .query(&[("limit", self.config.log_limit.to_string())])
            .timeout(self.config.request_timeout);
        if after_id > 0 {
            request = request.query(&[("after_id", after_id.to_string())]);
        } else if let Some(etag) = &self.logs_etag {
            // Validators only make sense for full listings; incremental
            // fetches are already scoped by the cursor.
            request = request.header("if-none-match", etag);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubscriberError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let etag = response
            .headers()
            .get("etag")
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body: Value = response.json().await?;

        if after_id == 0 {
            if let Some(etag) = etag {
                self.logs_etag = Some(etag);
            }
        }

        let entries: Vec<LogEntry> = body
            .get("logs")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(normalize_log_entry).collect())
            .unwrap_or_default();

        if after_id > 0 {
            self.store.merge_logs(entries).await;
        } else {
            self.store.replace_logs(entries).await;
        }
        Ok(())
    }

    async fn fetch_registrations(&mut self, force_full: bool) -> Result<(), SubscriberError> {
        let mut request = self
            .client
            .get(format!("{}/get_registered.php", self.config.api_base_url))
            .timeout(self.config.request_timeout);
        let incremental = !force_full && self.registered_cursor.is_some();
        if !force_full {
            if let Some(cursor) = &self.registered_cursor {
                request = request.query(&[("updated_since", cursor.as_str())]);
            }
            if let Some(etag) = &self.registered_etag {
                request = request.header("if-none-match", etag);
            }
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubscriberError::Server {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(etag) = response
            .headers()
            .get("etag")
            .and_then(|value| value.to_str().ok())
        {
            self.registered_etag = Some(etag.to_string());
        }
        let body: Value = response.json().await?;

        if let Some(last_modified) = body.get("last_modified").and_then(Value::as_str) {
            self.registered_cursor = Some(last_modified.to_string());
        }

        let rows: Vec<Registration> = body
            .get("registered")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(normalize_registration).collect())
            .unwrap_or_default();

        let filtered = body
            .get("filtered_since")
            .map(|value| !value.is_null() && *value != Value::Bool(false))
            .unwrap_or(false);

        if incremental && filtered {
            self.store.merge_registrations(rows).await;
        } else {
            self.store.replace_registrations(rows).await;
        }
        Ok(())
    }
}

/// Handle to a running poll loop.
pub struct PollerHandle {
    online_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    pub fn online(&self) -> watch::Receiver<bool> {
        self.online_rx.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
