//! Reconciliation poller tests against a mocked backend API.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use rfid_subscriber::{LogStore, Poller, PollerConfig};
use serde_json::json;

fn poller_for(server: &MockServer, store: Arc<LogStore>) -> Poller {
    Poller::new(
        PollerConfig {
            api_base_url: server.base_url(),
            interval: Duration::from_secs(2),
            log_limit: 50,
            request_timeout: Duration::from_secs(5),
        },
        store,
    )
}

fn log_row(id: i64) -> serde_json::Value {
    json!({
        "id": id,
        "time_log": "2025-01-15 08:30:00",
        "time_log_formatted": "2025-01-15 08:30:00 AM",
        "date": "2025-01-15",
        "time_12hr": "08:30:00 AM",
        "rfid_data": format!("TAG-{}", id),
        "rfid_status": true,
        "status_text": "1",
        "found": true,
    })
}

#[tokio::test]
async fn full_fetch_then_incremental_cursor() {
    let server = MockServer::start_async().await;
    let store = Arc::new(LogStore::new(50));
    let mut poller = poller_for(&server, store.clone());

    let full_logs = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/get_logs.php")
                .query_param("limit", "50");
            then.status(200)
                .header("etag", "\"logs-v1\"")
                .json_body(json!({
                    "success": true,
                    "count": 2,
                    "logs": [log_row(5), log_row(4)],
                    "cursor": {"latest_id": 5, "requested_after_id": 0},
                    "last_modified": "2025-01-15 08:30:00",
                    "etag": "logs-v1",
                }));
        })
        .await;
    let full_registered = server
        .mock_async(|when, then| {
            when.method(GET).path("/get_registered.php");
            then.status(200)
                .header("etag", "\"reg-v1\"")
                .json_body(json!({
                    "success": true,
                    "registered": [
                        {"id": 1, "rfid_data": "TAG-1", "rfid_status": true, "status_text": "1"},
                    ],
                    "last_modified": "2025-01-15 08:00:00",
                }));
        })
        .await;

    poller.poll_once(true).await.expect("full poll");
    assert_eq!(store.latest_log_id().await, 5);
    assert_eq!(store.registrations().await.len(), 1);
    full_logs.delete_async().await;
    full_registered.delete_async().await;

    // Incremental round: the logs request carries the cursor, the
    // registration request carries the validator and the time filter.
    let incremental_logs = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/get_logs.php")
                .query_param("after_id", "5");
            then.status(200).json_body(json!({
                "success": true,
                "count": 1,
                "logs": [log_row(6)],
                "cursor": {"latest_id": 6, "requested_after_id": 5},
                "last_modified": "2025-01-15 08:31:00",
                "etag": "logs-v2",
            }));
        })
        .await;
    let not_modified_registered = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/get_registered.php")
                .query_param("updated_since", "2025-01-15 08:00:00")
                .header("if-none-match", "\"reg-v1\"");
            then.status(304);
        })
        .await;

    poller.poll_once(false).await.expect("incremental poll");
    incremental_logs.assert_async().await;
    not_modified_registered.assert_async().await;

    let logs = store.logs().await;
    assert_eq!(logs.iter().map(|l| l.id).collect::<Vec<_>>(), vec![6, 5, 4]);
    // 304 means no merge; the registration list is untouched.
    assert_eq!(store.registrations().await.len(), 1);
}

#[tokio::test]
async fn unchanged_logs_answer_304_and_skip_the_merge() {
    let server = MockServer::start_async().await;
    let store = Arc::new(LogStore::new(50));
    let mut poller = poller_for(&server, store.clone());

    // Backend currently has no rows, so the cursor stays at zero and the
    // next round revalidates with the stored entity tag.
    let empty_logs = server
        .mock_async(|when, then| {
            when.method(GET).path("/get_logs.php");
            then.status(200)
                .header("etag", "\"empty\"")
                .json_body(json!({
                    "success": true,
                    "count": 0,
                    "logs": [],
                    "cursor": {"latest_id": 0, "requested_after_id": 0},
                    "last_modified": null,
                    "etag": "empty",
                }));
        })
        .await;
    let registered = server
        .mock_async(|when, then| {
            when.method(GET).path("/get_registered.php");
            then.status(200).json_body(json!({
                "success": true,
                "registered": [],
                "last_modified": null,
            }));
        })
        .await;

    poller.poll_once(true).await.expect("full poll");
    empty_logs.delete_async().await;
    registered.delete_async().await;

    let revalidated = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/get_logs.php")
                .header("if-none-match", "\"empty\"");
            then.status(304);
        })
        .await;
    let registered_again = server
        .mock_async(|when, then| {
            when.method(GET).path("/get_registered.php");
            then.status(200).json_body(json!({
                "success": true,
                "registered": [],
                "last_modified": null,
            }));
        })
        .await;

    poller.poll_once(false).await.expect("revalidation poll");
    revalidated.assert_async().await;
    let _ = registered_again;
    assert_eq!(store.log_count().await, 0);
}

#[tokio::test]
async fn filtered_registrations_merge_instead_of_replacing() {
    let server = MockServer::start_async().await;
    let store = Arc::new(LogStore::new(50));
    let mut poller = poller_for(&server, store.clone());

    let full = server
        .mock_async(|when, then| {
            when.method(GET).path("/get_registered.php");
            then.status(200).json_body(json!({
                "success": true,
                "registered": [
                    {"id": 1, "rfid_data": "TAG-1", "rfid_status": true},
                    {"id": 2, "rfid_data": "TAG-2", "rfid_status": true},
                ],
                "last_modified": "2025-01-15 08:00:00",
            }));
        })
        .await;
    let logs = server
        .mock_async(|when, then| {
            when.method(GET).path("/get_logs.php");
            then.status(200).json_body(json!({
                "success": true, "count": 0, "logs": [],
                "cursor": {"latest_id": 0, "requested_after_id": 0},
                "last_modified": null, "etag": "x",
            }));
        })
        .await;

    poller.poll_once(true).await.expect("full poll");
    full.delete_async().await;
    let _ = logs;

    // Only tag 2 changed since the cursor; the filtered response must
    // upsert it without dropping tag 1.
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/get_registered.php")
                .query_param("updated_since", "2025-01-15 08:00:00");
            then.status(200).json_body(json!({
                "success": true,
                "registered": [
                    {"id": 2, "rfid_data": "TAG-2", "rfid_status": false},
                ],
                "filtered_since": "2025-01-15 08:00:00",
                "last_modified": "2025-01-15 08:05:00",
            }));
        })
        .await;

    poller.poll_once(false).await.expect("incremental poll");

    let regs = store.registrations().await;
    assert_eq!(regs.len(), 2);
    assert!(regs[0].rfid_status);
    assert!(!regs[1].rfid_status);
}

#[tokio::test]
async fn backend_failure_marks_offline_and_clears_validators() {
    let server = MockServer::start_async().await;
    let store = Arc::new(LogStore::new(50));
    let mut poller = poller_for(&server, store.clone());
    let online = poller.online();

    server
        .mock_async(|when, then| {
            when.method(GET).path("/get_logs.php");
            then.status(500).body("boom");
        })
        .await;

    assert!(poller.poll_once(true).await.is_err());
    assert!(!*online.borrow());
    assert_eq!(store.log_count().await, 0);
}
