/// Errors returned by the pushload transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("websocket send failed: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    #[error("frame serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("frame deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("connection is closed")]
    Closed,

    #[error("invalid push endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("notification post failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("tls configuration failed: {0}")]
    Tls(String),

    #[error("vapid key error: {0}")]
    VapidKey(String),

    #[error("vapid claims missing `{0}`")]
    VapidClaim(&'static str),

    #[error("vapid signing failed: {0}")]
    VapidSign(#[source] jsonwebtoken::errors::Error),
}
