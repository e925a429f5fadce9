//! The command/event vocabulary scenarios speak with their driver.

use std::time::Duration;

use serde_json::{Map, Value};

use pushload_transport::wire::{
    HelloResponse, Notification, RegisterResponse, UnregisterResponse,
};
use pushload_transport::NotificationResponse;

use crate::registry::ScenarioFn;
use crate::testplan::ScenarioArgs;

/// A command yielded by a scenario. Commands either complete immediately
/// (`wait`, timers, counters, `ack`) or suspend the scenario until the
/// correlated transport event or timeout arrives.
pub enum Command {
    Connect,
    Disconnect,
    Hello {
        uaid: Option<String>,
    },
    Register {
        channel_id: String,
        key: Option<String>,
    },
    Unregister {
        channel_id: String,
    },
    SendNotification {
        endpoint_url: String,
        data: Option<Vec<u8>>,
        ttl: u32,
        claims: Option<Map<String, Value>>,
    },
    ExpectNotification {
        channel_id: String,
        time: Duration,
    },
    ExpectNotifications {
        channel_ids: Vec<String>,
        time: Duration,
    },
    Ack {
        channel_id: String,
        version: String,
    },
    Wait {
        time: Duration,
    },
    TimerStart {
        name: String,
    },
    TimerEnd {
        name: String,
    },
    Counter {
        name: String,
        count: i64,
    },
    Spawn {
        test_plan: String,
    },
    /// A nested scenario to run to completion before resuming the parent.
    SubScenario {
        func: ScenarioFn,
        args: ScenarioArgs,
    },
}

impl Command {
    /// The command kind, used for correlating inbound server events.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Disconnect => "disconnect",
            Command::Hello { .. } => "hello",
            Command::Register { .. } => "register",
            Command::Unregister { .. } => "unregister",
            Command::SendNotification { .. } => "send_notification",
            Command::ExpectNotification { .. } => "expect_notification",
            Command::ExpectNotifications { .. } => "expect_notifications",
            Command::Ack { .. } => "ack",
            Command::Wait { .. } => "wait",
            Command::TimerStart { .. } => "timer_start",
            Command::TimerEnd { .. } => "timer_end",
            Command::Counter { .. } => "counter",
            Command::Spawn { .. } => "spawn",
            Command::SubScenario { .. } => "sub_scenario",
        }
    }
}

/// The value a scenario is resumed with after yielding a command.
#[derive(Debug)]
pub enum CommandResult {
    /// Immediate commands and finished sub-scenarios resume with nothing.
    None,
    Connected,
    Disconnected {
        was_clean: bool,
        code: Option<u16>,
        reason: String,
    },
    Hello(HelloResponse),
    Registered(RegisterResponse),
    Unregistered(UnregisterResponse),
    /// `expect_notification*`: the matched notification, or `None` on
    /// timeout (absence is legitimate, not an error).
    Notification(Option<Notification>),
    /// `send_notification`: the endpoint's reply, or the delivery failure.
    Http(Result<NotificationResponse, String>),
    /// `timer_end`: elapsed milliseconds.
    TimerMs(u64),
}
