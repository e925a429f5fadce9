//! StatsD backend — UDP datagrams in the statsd line protocol.

use std::io;
use std::net::UdpSocket;

use crate::Metrics;

/// Sends `<namespace>.<name>:<value>|<kind>` datagrams to a statsd host.
///
/// The socket is non-blocking and send failures are dropped on the floor;
/// losing a metric is always preferable to stalling a driver.
pub struct StatsdMetrics {
    socket: UdpSocket,
    namespace: String,
}

impl StatsdMetrics {
    pub fn new(host: &str, port: u16, namespace: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((host, port))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            namespace: namespace.to_string(),
        })
    }

    fn emit(&self, line: String) {
        if let Err(e) = self.socket.send(line.as_bytes()) {
            tracing::trace!("statsd send dropped: {e}");
        }
    }
}

impl Metrics for StatsdMetrics {
    fn increment(&self, name: &str, count: i64) {
        self.emit(counter_line(&self.namespace, name, count));
    }

    fn timing(&self, name: &str, ms: u64) {
        self.emit(timing_line(&self.namespace, name, ms));
    }
}

fn counter_line(namespace: &str, name: &str, count: i64) -> String {
    format!("{namespace}.{name}:{count}|c")
}

fn timing_line(namespace: &str, name: &str, ms: u64) -> String {
    format!("{namespace}.{name}:{ms}|ms")
}
