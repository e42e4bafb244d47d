//! Headless live-updates monitor.
//!
//! Connects to the bridge, runs the polling reconciliation path, and logs
//! connection state changes and newly observed scans. Useful for watching
//! the system without the browser dashboard.

use std::sync::Arc;
use std::time::Duration;

use rfid_subscriber::{ClientConfig, LiveClient, LogStore, Poller, PollerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut client_config = ClientConfig::default();
    if let Ok(url) = std::env::var("LIVE_UPDATES_URL") {
        client_config.url = url;
    }
    client_config.client_id = std::env::var("SUBSCRIBER_CLIENT_ID").ok();

    let mut poller_config = PollerConfig::default();
    if let Ok(base) = std::env::var("RFID_API_BASE_URL") {
        poller_config.api_base_url = base;
    }

    let cache_limit = std::env::var("LOG_CACHE_LIMIT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(50);

    let store = Arc::new(LogStore::new(cache_limit));
    let client = LiveClient::spawn(client_config, store.clone());
    let poller = Poller::new(poller_config, store.clone()).spawn();

    let mut status_rx = client.status();
    let mut online_rx = poller.online();
    let mut last_head: Option<i64> = None;

    log::info!("RFID subscriber monitor started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                log::info!("Live updates: {:?}", *status_rx.borrow());
            }
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow();
                log::info!("Backend {}", if online { "online" } else { "offline" });
            }
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                if let Some(head) = store.logs().await.first() {
                    if last_head != Some(head.id) {
                        last_head = Some(head.id);
                        log::info!(
                            "Latest scan #{}: {} [{}] at {}",
                            head.id,
                            head.rfid_data,
                            head.status_text,
                            head.time_log_formatted
                        );
                    }
                }
            }
        }
    }

    client.shutdown().await;
    poller.shutdown().await;
}
