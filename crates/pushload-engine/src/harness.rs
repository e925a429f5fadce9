//! The per-scenario-kind harness.
//!
//! Owns the shared transport configuration for one running scenario kind:
//! the WebSocket dial config, the notification sender, the metrics sink and
//! the back-reference to the LoadRunner for `spawn`. Drivers that issue
//! `connect` are queued FIFO and paired with sockets as they open; an
//! unexpected socket (nobody waiting) is closed immediately, and an early
//! failure with waiters still queued triggers a replacement dial.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pushload_metrics::Metrics;
use pushload_transport::ws::{self, PairingEvent, WsConfig, WsEvent};
use pushload_transport::{NotificationRequest, NotificationSender};

use crate::client::DeliveryResult;
use crate::driver::ScenarioDriver;
use crate::registry::ScenarioSpec;
use crate::runner::RunnerHandle;
use crate::testplan::ScenarioArgs;
use crate::ScenarioError;

/// Delay before replacing a socket that failed before pairing.
const REDIAL_BACKOFF: Duration = Duration::from_millis(500);

pub struct HarnessConfig {
    pub ws: WsConfig,
    pub http: Arc<NotificationSender>,
    pub metrics: Arc<dyn Metrics>,
    pub runner: RunnerHandle,
}

pub struct Harness;

impl Harness {
    /// Start the pairing loop and return the shared handle.
    pub fn spawn(config: HarnessConfig) -> HarnessHandle {
        let (connect_tx, connect_rx) = mpsc::channel(64);
        let (pairing_tx, pairing_rx) = mpsc::channel(64);
        let ws_config = Arc::new(config.ws);

        tokio::spawn(pairing_loop(
            ws_config,
            connect_rx,
            pairing_tx,
            pairing_rx,
        ));

        HarnessHandle {
            shared: Arc::new(HarnessShared {
                http: config.http,
                metrics: config.metrics,
                runner: config.runner,
                connect_tx,
                active: AtomicI64::new(0),
            }),
        }
    }
}

struct HarnessShared {
    http: Arc<NotificationSender>,
    metrics: Arc<dyn Metrics>,
    runner: RunnerHandle,
    connect_tx: mpsc::Sender<mpsc::Sender<WsEvent>>,
    active: AtomicI64,
}

/// Cheap-clone handle drivers and the LoadRunner hold.
#[derive(Clone)]
pub struct HarnessHandle {
    shared: Arc<HarnessShared>,
}

impl HarnessHandle {
    /// Launch one driver for `spec`.
    pub fn run(&self, spec: Arc<ScenarioSpec>, args: ScenarioArgs) {
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        let driver = ScenarioDriver::new(self.clone(), spec, args);
        tokio::spawn(driver.run());
    }

    /// Drivers still running (or queued for pairing) under this harness.
    pub fn active_drivers(&self) -> i64 {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Queue `driver` for the next opened socket and start a dial.
    pub(crate) async fn connect(&self, driver: mpsc::Sender<WsEvent>) {
        let _ = self.shared.connect_tx.send(driver).await;
    }

    /// Post a notification in the background; the completed outcome lands in
    /// the calling driver's resume slot via `reply`.
    pub(crate) fn send_notification(
        &self,
        request: NotificationRequest,
        reply: mpsc::Sender<DeliveryResult>,
    ) {
        let http = self.shared.http.clone();
        tokio::spawn(async move {
            let delivery = http.send(request).await.map_err(|e| e.to_string());
            let _ = reply.send(delivery).await;
        });
    }

    /// Launch additional scenarios on the running LoadRunner.
    pub(crate) fn spawn_plan(&self, plan: &str) -> Result<(), ScenarioError> {
        self.shared.runner.spawn_plan(plan)
    }

    pub fn record_timing(&self, name: &str, ms: u64) {
        self.shared.metrics.timing(name, ms);
    }

    pub fn record_counter(&self, name: &str, count: i64) {
        self.shared.metrics.increment(name, count);
    }

    pub(crate) fn driver_finished(&self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// FIFO pairing of waiting drivers with opened sockets.
async fn pairing_loop(
    ws_config: Arc<WsConfig>,
    mut connect_rx: mpsc::Receiver<mpsc::Sender<WsEvent>>,
    pairing_tx: mpsc::Sender<PairingEvent>,
    mut pairing_rx: mpsc::Receiver<PairingEvent>,
) {
    let mut waiters: VecDeque<mpsc::Sender<WsEvent>> = VecDeque::new();
    loop {
        tokio::select! {
            request = connect_rx.recv() => match request {
                Some(driver) => {
                    waiters.push_back(driver);
                    ws::spawn_connection(ws_config.clone(), pairing_tx.clone());
                }
                // Every handle dropped: the harness is done.
                None => break,
            },
            event = pairing_rx.recv() => match event {
                Some(PairingEvent::Opened { attach }) => match waiters.pop_front() {
                    Some(driver) => {
                        // The socket task is gone when this fails; keep the
                        // driver at the head for the next socket.
                        if let Err(Some(driver)) = attach.send(Some(driver)) {
                            waiters.push_front(driver);
                        }
                    }
                    None => {
                        tracing::debug!("no waiting driver for new connection");
                        let _ = attach.send(None);
                    }
                },
                Some(PairingEvent::OpenFailed) | Some(PairingEvent::ClosedUnattached) => {
                    if !waiters.is_empty() {
                        tracing::debug!("connection lost before pairing, redialing");
                        let config = ws_config.clone();
                        let pairing = pairing_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(REDIAL_BACKOFF).await;
                            ws::spawn_connection(config, pairing);
                        });
                    }
                }
                None => break,
            },
        }
    }
}
