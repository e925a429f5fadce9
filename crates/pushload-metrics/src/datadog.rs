//! Datadog backend — buffered points posted to the v1 series API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::Notify;

use crate::Metrics;

const SERIES_URL: &str = "https://api.datadoghq.com/api/v1/series";

#[derive(Debug, Clone, Serialize)]
struct Point {
    metric: String,
    points: Vec<(u64, f64)>,
    #[serde(rename = "type")]
    kind: &'static str,
    host: String,
}

#[derive(Serialize)]
struct Series<'a> {
    series: &'a [Point],
}

struct Shared {
    namespace: String,
    host: String,
    buffer: Mutex<Vec<Point>>,
    flush_now: Notify,
    stopped: AtomicBool,
}

/// Buffers counter and timing points, flushing them to Datadog on a fixed
/// interval from a background task.
pub struct DatadogMetrics {
    shared: Arc<Shared>,
}

impl DatadogMetrics {
    pub fn new(api_key: &str, _app_key: Option<&str>, flush_interval: u64, namespace: &str) -> Self {
        let shared = Arc::new(Shared {
            namespace: namespace.to_string(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            buffer: Mutex::new(Vec::new()),
            flush_now: Notify::new(),
            stopped: AtomicBool::new(false),
        });

        tokio::spawn(flush_loop(
            shared.clone(),
            api_key.to_string(),
            Duration::from_secs(flush_interval.max(1)),
        ));

        Self { shared }
    }

    fn push(&self, name: &str, value: f64, kind: &'static str) {
        let point = Point {
            metric: format!("{}.{name}", self.shared.namespace),
            points: vec![(epoch_secs(), value)],
            kind,
            host: self.shared.host.clone(),
        };
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            buffer.push(point);
        }
    }
}

impl Metrics for DatadogMetrics {
    fn increment(&self, name: &str, count: i64) {
        self.push(name, count as f64, "count");
    }

    fn timing(&self, name: &str, ms: u64) {
        self.push(name, ms as f64, "gauge");
    }

    fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.flush_now.notify_one();
    }
}

async fn flush_loop(shared: Arc<Shared>, api_key: String, interval: Duration) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.flush_now.notified() => {}
        }

        let points: Vec<Point> = match shared.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        if !points.is_empty() {
            let result = client
                .post(SERIES_URL)
                .query(&[("api_key", api_key.as_str())])
                .json(&Series { series: &points })
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!("datadog flush rejected: {}", response.status());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("datadog flush failed: {e}"),
            }
        }

        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
