//! WebSocket control-channel adapter.
//!
//! One connection task per socket. The harness dials sockets with
//! [`spawn_connection`]; the task reports pairing milestones back on the
//! harness channel ([`PairingEvent`]) and, once attached, delivers
//! [`WsEvent`]s to exactly one driver. Drivers hold a [`WsClient`] whose
//! operations are all non-blocking channel sends.
//!
//! Ownership rule: a socket belongs to at most one driver. `detach()` stops
//! all further event delivery, so a driver tearing a connection down can
//! detach first and never see the close it caused.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use url::Url;

use crate::wire::{ClientFrame, ServerFrame};
use crate::{tls, TransportError};

/// Origin header sent on every connection, matching what the push server
/// expects from a browser client.
pub const DEFAULT_ORIGIN: &str = "http://localhost:9000";

/// Shared per-harness websocket configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: Url,
    pub origin: String,
    /// Verify the server certificate for `wss` URLs. Load tests against
    /// staging servers with self-signed certs turn this off.
    pub verify_tls: bool,
}

impl WsConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            origin: DEFAULT_ORIGIN.to_string(),
            verify_tls: true,
        }
    }
}

/// Events delivered to the driver that owns a connection.
#[derive(Debug)]
pub enum WsEvent {
    /// The socket opened and was paired with this driver.
    Connected(WsClient),
    /// A parsed inbound frame.
    Frame(ServerFrame),
    /// An inbound frame that was not valid JSON, or a send failure.
    Error(String),
    /// The socket closed.
    Closed {
        was_clean: bool,
        code: Option<u16>,
        reason: String,
    },
}

/// Pairing milestones reported to the harness.
pub enum PairingEvent {
    /// The socket opened; the harness answers with the event sender of the
    /// next queued driver, or `None` to close the socket immediately.
    Opened {
        attach: oneshot::Sender<Option<mpsc::Sender<WsEvent>>>,
    },
    /// The dial failed before a socket existed.
    OpenFailed,
    /// The socket closed without ever being matched to a driver.
    ClosedUnattached,
}

enum WsControl {
    Send(String),
    Close,
    Detach,
}

/// Driver-side handle to an attached connection. Cheap to clone; all
/// operations are non-blocking.
#[derive(Debug, Clone)]
pub struct WsClient {
    control: mpsc::UnboundedSender<WsControl>,
}

impl WsClient {
    /// Serialize a frame and queue it for sending.
    pub fn send_json(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let json = frame.to_json().map_err(TransportError::Serialization)?;
        self.control
            .send(WsControl::Send(json))
            .map_err(|_| TransportError::Closed)
    }

    /// Initiate the close handshake.
    pub fn close(&self) {
        let _ = self.control.send(WsControl::Close);
    }

    /// Stop event delivery to the owning driver.
    pub fn detach(&self) {
        let _ = self.control.send(WsControl::Detach);
    }
}

/// Dial a new connection; the task reports back on `pairing`.
pub fn spawn_connection(config: Arc<WsConfig>, pairing: mpsc::Sender<PairingEvent>) {
    tokio::spawn(run_connection(config, pairing));
}

fn client_request(config: &WsConfig) -> Result<Request, TransportError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    let origin = HeaderValue::from_str(&config.origin)
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    request.headers_mut().insert(ORIGIN, origin);
    Ok(request)
}

async fn run_connection(config: Arc<WsConfig>, pairing: mpsc::Sender<PairingEvent>) {
    let request = match client_request(&config) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("websocket request build failed: {e}");
            let _ = pairing.send(PairingEvent::OpenFailed).await;
            return;
        }
    };

    let connector = if config.url.scheme() == "wss" && !config.verify_tls {
        match tls::unverified_client_config() {
            Ok(tls_config) => Some(Connector::Rustls(Arc::new(tls_config))),
            Err(e) => {
                tracing::warn!("tls config failed: {e}");
                let _ = pairing.send(PairingEvent::OpenFailed).await;
                return;
            }
        }
    } else {
        None
    };

    let ws = match tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
        .await
    {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::debug!("websocket connect failed: {e}");
            let _ = pairing.send(PairingEvent::OpenFailed).await;
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    // Hand the socket to the harness for pairing.
    let (attach_tx, attach_rx) = oneshot::channel();
    if pairing
        .send(PairingEvent::Opened { attach: attach_tx })
        .await
        .is_err()
    {
        return;
    }
    let mut driver = match attach_rx.await {
        Ok(Some(driver)) => Some(driver),
        // No waiting driver: unnecessary open, close it again.
        _ => {
            let _ = sink.send(Message::Close(None)).await;
            let _ = pairing.send(PairingEvent::ClosedUnattached).await;
            return;
        }
    };

    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let client = WsClient {
        control: control_tx,
    };
    deliver(&mut driver, WsEvent::Connected(client)).await;

    let mut control_open = true;
    let closed = loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let event = match ServerFrame::from_json(text.as_str()) {
                        Ok(frame) => WsEvent::Frame(frame),
                        Err(e) => WsEvent::Error(format!("bad frame: {e}")),
                    };
                    deliver(&mut driver, event).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    break WsEvent::Closed { was_clean: true, code, reason };
                }
                // Pings are answered by tungstenite itself; binary frames are
                // not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break WsEvent::Closed {
                        was_clean: false,
                        code: None,
                        reason: e.to_string(),
                    };
                }
                None => {
                    break WsEvent::Closed {
                        was_clean: false,
                        code: None,
                        reason: "connection lost".to_string(),
                    };
                }
            },
            ctrl = control_rx.recv(), if control_open => match ctrl {
                Some(WsControl::Send(json)) => {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        deliver(&mut driver, WsEvent::Error(format!("send failed: {e}"))).await;
                    }
                }
                Some(WsControl::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                }
                Some(WsControl::Detach) => {
                    driver = None;
                }
                // Every handle dropped: the owning driver is gone.
                None => {
                    control_open = false;
                    let _ = sink.send(Message::Close(None)).await;
                }
            },
        }
    };

    deliver(&mut driver, closed).await;
}

async fn deliver(driver: &mut Option<mpsc::Sender<WsEvent>>, event: WsEvent) {
    if let Some(tx) = driver {
        if tx.send(event).await.is_err() {
            *driver = None;
        }
    }
}
