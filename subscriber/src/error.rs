use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },
}
