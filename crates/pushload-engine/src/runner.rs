//! The top-level load runner.
//!
//! Accepts a test plan, creates one harness per entry, and schedules driver
//! launches: `quantity` drivers over `quantity / stagger` seconds at
//! `stagger` launches per second, starting `delay` seconds after start. Any
//! remainder of `quantity` not divisible by `stagger` is dropped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use url::Url;

use pushload_metrics::Metrics;
use pushload_transport::http::EndpointTls;
use pushload_transport::ws::WsConfig;
use pushload_transport::{NotificationSender, Vapid};

use crate::harness::{Harness, HarnessConfig, HarnessHandle};
use crate::registry::ScenarioRegistry;
use crate::testplan::{parse_test_plan, TestPlanEntry};
use crate::ScenarioError;

/// Shared configuration for every harness the runner creates.
pub struct RunnerConfig {
    pub websocket_url: Url,
    pub origin: String,
    /// Verify the push server's certificate on `wss`.
    pub verify_tls: bool,
    /// Optional scheme://host:port override for push endpoints.
    pub endpoint: Option<Url>,
    pub endpoint_tls: EndpointTls,
    pub metrics: Arc<dyn Metrics>,
}

struct RunnerInner {
    config: RunnerConfig,
    registry: Arc<ScenarioRegistry>,
    /// Shared connection pool for all notification senders.
    http_client: reqwest::Client,
    harnesses: Mutex<Vec<HarnessHandle>>,
    started: AtomicBool,
    queued: AtomicUsize,
}

/// Runs a set of scenarios for a load test. Lives for the whole process.
#[derive(Clone)]
pub struct LoadRunner {
    inner: Arc<RunnerInner>,
}

impl LoadRunner {
    pub fn new(
        config: RunnerConfig,
        registry: Arc<ScenarioRegistry>,
    ) -> Result<Self, ScenarioError> {
        let http_client = NotificationSender::build_client(&config.endpoint_tls)
            .map_err(|e| ScenarioError::Transport(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(RunnerInner {
                config,
                registry,
                http_client,
                harnesses: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                queued: AtomicUsize::new(0),
            }),
        })
    }

    /// Schedule every supplied entry, then mark the runner started.
    pub fn start(&self, plan: Vec<TestPlanEntry>) -> Result<(), ScenarioError> {
        for entry in plan {
            self.run_entry(entry)?;
        }
        self.inner.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run_entry(&self, entry: TestPlanEntry) -> Result<(), ScenarioError> {
        let inner = &self.inner;

        let vapid = match entry.args.get_str("vapid_private_key") {
            Some(pem) => Vapid::from_pem(pem),
            None => Vapid::generate(),
        }
        .map_err(|e| ScenarioError::Transport(e.to_string()))?;
        let claims = entry.args.vapid_claims();

        let sender = NotificationSender::new(
            inner.http_client.clone(),
            inner.config.endpoint.clone(),
            Some(vapid),
            claims,
        );
        let mut ws = WsConfig::new(inner.config.websocket_url.clone());
        ws.origin = inner.config.origin.clone();
        ws.verify_tls = inner.config.verify_tls;

        let harness = Harness::spawn(HarnessConfig {
            ws,
            http: Arc::new(sender),
            metrics: inner.config.metrics.clone(),
            runner: RunnerHandle {
                inner: Arc::downgrade(inner),
            },
        });
        inner
            .harnesses
            .lock()
            .expect("harness list lock")
            .push(harness.clone());

        tracing::info!(
            scenario = %entry.scenario.name,
            quantity = entry.quantity,
            stagger = entry.stagger,
            delay = entry.delay,
            "scheduling test plan entry"
        );

        let iterations = entry.quantity / entry.stagger;
        if iterations * entry.stagger < entry.quantity {
            tracing::warn!(
                scenario = %entry.scenario.name,
                dropped = entry.quantity % entry.stagger,
                "stagger does not divide quantity, dropping remainder"
            );
        }
        for second in 0..iterations {
            inner.queued.fetch_add(1, Ordering::SeqCst);
            let harness = harness.clone();
            let spec = entry.scenario.clone();
            let args = entry.args.clone();
            let queued = self.inner.clone();
            let stagger = entry.stagger;
            let delay = entry.delay + u64::from(second);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(delay)).await;
                for _ in 0..stagger {
                    harness.run(spec.clone(), args.clone());
                }
                queued.queued.fetch_sub(1, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    /// True once started, with no launches still queued and no live drivers.
    /// Monotone: drivers only launch from queued calls, so once every count
    /// reaches zero nothing can flip it back.
    pub fn finished(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
            && self.inner.queued.load(Ordering::SeqCst) == 0
            && self
                .inner
                .harnesses
                .lock()
                .expect("harness list lock")
                .iter()
                .all(|harness| harness.active_drivers() <= 0)
    }

    /// Poll `finished` once a second until it flips true.
    pub async fn wait_finished(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if self.finished() {
                break;
            }
        }
        self.inner.config.metrics.stop();
    }

    /// Parse and launch a plan on the running load test (the `spawn`
    /// command). Only the first entry of the plan is launched.
    pub fn spawn_plan(&self, plan: &str) -> Result<(), ScenarioError> {
        let entries = parse_test_plan(&self.inner.registry, plan)?;
        if let Some(first) = entries.into_iter().next() {
            self.run_entry(first)?;
        }
        Ok(())
    }

    pub fn registry(&self) -> Arc<ScenarioRegistry> {
        self.inner.registry.clone()
    }
}

/// Weak back-reference handed to harnesses for `spawn`.
#[derive(Clone)]
pub struct RunnerHandle {
    inner: Weak<RunnerInner>,
}

impl RunnerHandle {
    pub fn spawn_plan(&self, plan: &str) -> Result<(), ScenarioError> {
        match self.inner.upgrade() {
            Some(inner) => LoadRunner { inner }.spawn_plan(plan),
            None => Err(ScenarioError::DriverGone),
        }
    }
}
