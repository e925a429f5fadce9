//! WebPush control-channel frames.
//!
//! JSON objects discriminated by their `messageType` field. Field names
//! follow the wire protocol exactly (`channelID`, `pushEndpoint`), so these
//! types are the single source of truth for the frame layout.

use serde::{Deserialize, Serialize};

/// Client → server frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum ClientFrame {
    Hello {
        use_webpush: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        uaid: Option<String>,
    },
    Register {
        #[serde(rename = "channelID")]
        channel_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Unregister {
        #[serde(rename = "channelID")]
        channel_id: String,
    },
    Ack {
        updates: Vec<AckUpdate>,
    },
}

/// One acknowledged message inside an `ack` frame.
#[derive(Debug, Clone, Serialize)]
pub struct AckUpdate {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    pub version: String,
}

impl ClientFrame {
    pub fn hello(uaid: Option<String>) -> Self {
        ClientFrame::Hello {
            use_webpush: true,
            uaid,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server → client frames.
///
/// Unknown `messageType` values fail deserialization; the websocket adapter
/// surfaces that as an `error` event to the owning driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum ServerFrame {
    Hello(HelloResponse),
    Register(RegisterResponse),
    Unregister(UnregisterResponse),
    Notification(Notification),
}

impl ServerFrame {
    /// The wire name of this frame, used for command correlation.
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerFrame::Hello(_) => "hello",
            ServerFrame::Register(_) => "register",
            ServerFrame::Unregister(_) => "unregister",
            ServerFrame::Notification(_) => "notification",
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Handshake reply carrying the user-agent id.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloResponse {
    pub uaid: String,
    #[serde(default)]
    pub status: Option<u16>,
}

/// Subscription reply carrying the per-channel push endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(rename = "pushEndpoint")]
    pub push_endpoint: String,
    #[serde(default)]
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnregisterResponse {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(default)]
    pub status: Option<u16>,
}

/// A delivered notification. `data` is the base64url body of the POST that
/// produced it, absent for data-free notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    pub version: String,
    #[serde(default)]
    pub data: Option<String>,
}
