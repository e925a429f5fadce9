//! Test support: an in-process mock push server and a recording metrics
//! sink.
//!
//! The server speaks just enough WebPush to exercise scenarios end to end:
//! hello/register/unregister over the WebSocket, and direct store-free
//! delivery of POSTed notifications back over the registering connection,
//! body forwarded untouched (base64url-encoded on the wire).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use pushload_engine::{LoadRunner, RunnerConfig, ScenarioRegistry};
use pushload_metrics::Metrics;
use pushload_transport::http::EndpointTls;
use pushload_transport::ws::DEFAULT_ORIGIN;

type Channels = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>>;

#[derive(Clone)]
struct ServerState {
    channels: Channels,
    versions: Arc<AtomicU64>,
    addr: SocketAddr,
}

pub struct MockPushServer {
    pub ws_url: Url,
}

impl MockPushServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = ServerState {
            channels: Arc::new(Mutex::new(HashMap::new())),
            versions: Arc::new(AtomicU64::new(0)),
            addr,
        };
        let app = Router::new()
            .route("/", get(ws_handler))
            .route("/wpush/{chid}", post(push_handler))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            ws_url: Url::parse(&format!("ws://{addr}/")).unwrap(),
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ServerState) {
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Value>();
    let mut registered: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                let reply = match frame["messageType"].as_str() {
                    Some("hello") => {
                        let uaid = frame
                            .get("uaid")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                        Some(json!({
                            "messageType": "hello",
                            "uaid": uaid,
                            "status": 200,
                            "use_webpush": true,
                        }))
                    }
                    Some("register") => {
                        let chid = frame["channelID"].as_str().unwrap_or_default().to_string();
                        state
                            .channels
                            .lock()
                            .unwrap()
                            .insert(chid.clone(), push_tx.clone());
                        registered.push(chid.clone());
                        Some(json!({
                            "messageType": "register",
                            "channelID": chid,
                            "pushEndpoint": format!("http://{}/wpush/{chid}", state.addr),
                            "status": 200,
                        }))
                    }
                    Some("unregister") => {
                        let chid = frame["channelID"].as_str().unwrap_or_default().to_string();
                        state.channels.lock().unwrap().remove(&chid);
                        Some(json!({
                            "messageType": "unregister",
                            "channelID": chid,
                            "status": 200,
                        }))
                    }
                    // Acks are consumed silently.
                    Some("ack") => None,
                    _ => None,
                };
                if let Some(reply) = reply {
                    if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
            Some(notification) = push_rx.recv() => {
                if socket
                    .send(Message::Text(notification.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    let mut channels = state.channels.lock().unwrap();
    for chid in registered {
        channels.remove(&chid);
    }
}

async fn push_handler(
    Path(chid): Path<String>,
    State(state): State<ServerState>,
    body: Bytes,
) -> (StatusCode, String) {
    let target = state.channels.lock().unwrap().get(&chid).cloned();
    let Some(target) = target else {
        return (StatusCode::NOT_FOUND, "unknown channel".to_string());
    };
    let version = state.versions.fetch_add(1, Ordering::SeqCst) + 1;
    let mut notification = json!({
        "messageType": "notification",
        "channelID": chid,
        "version": version.to_string(),
    });
    if !body.is_empty() {
        notification["data"] = Value::from(URL_SAFE_NO_PAD.encode(&body));
    }
    let _ = target.send(notification);
    (StatusCode::CREATED, String::new())
}

/// Counts everything it sees, for asserting scenario side effects.
#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, i64>>,
    timings: Mutex<Vec<(String, u64)>>,
}

impl RecordingMetrics {
    pub fn counter(&self, name: &str) -> i64 {
        *self.counters.lock().unwrap().get(name).unwrap_or(&0)
    }

    pub fn timing_count(&self, name: &str) -> usize {
        self.timings
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }
}

impl Metrics for RecordingMetrics {
    fn increment(&self, name: &str, count: i64) {
        *self.counters.lock().unwrap().entry(name.to_string()).or_insert(0) += count;
    }

    fn timing(&self, name: &str, ms: u64) {
        self.timings.lock().unwrap().push((name.to_string(), ms));
    }
}

/// A LoadRunner aimed at the mock server.
pub fn runner(
    server: &MockPushServer,
    registry: Arc<ScenarioRegistry>,
    metrics: Arc<dyn Metrics>,
) -> LoadRunner {
    LoadRunner::new(
        RunnerConfig {
            websocket_url: server.ws_url.clone(),
            origin: DEFAULT_ORIGIN.to_string(),
            verify_tls: true,
            endpoint: None,
            endpoint_tls: EndpointTls::default(),
            metrics,
        },
        registry,
    )
    .unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}
