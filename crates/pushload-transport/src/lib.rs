//! Transport adapters for the pushload WebPush load generator.
//!
//! Two wire surfaces, behind channel-based adapters:
//!
//! - [`ws`] — one WebSocket control channel per virtual client, paired with
//!   its driver through the harness, delivering [`ws::WsEvent`]s.
//! - [`http`] — a shared HTTP notification sender posting to push endpoints,
//!   with optional VAPID signing ([`vapid`]).
//!
//! The JSON frame vocabulary both sides speak lives in [`wire`].

mod error;
pub mod http;
pub mod tls;
pub mod vapid;
pub mod wire;
pub mod ws;

pub use error::TransportError;
pub use http::{NotificationRequest, NotificationResponse, NotificationSender};
pub use vapid::Vapid;
pub use wire::{ClientFrame, Notification, ServerFrame};
pub use ws::{WsClient, WsConfig, WsEvent};
