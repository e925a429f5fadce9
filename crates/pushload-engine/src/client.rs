//! The scenario-facing command API.
//!
//! Each method sends one [`Command`] to the owning driver together with a
//! oneshot resume slot, then suspends until the driver resumes it with the
//! command's result or injects an error. The driver processes one command at
//! a time, so within one scenario instance resumes happen strictly in yield
//! order.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use pushload_transport::wire::{
    HelloResponse, Notification, RegisterResponse, UnregisterResponse,
};
use pushload_transport::NotificationResponse;

use crate::command::{Command, CommandResult};
use crate::registry::ScenarioSpec;
use crate::testplan::ScenarioArgs;
use crate::ScenarioError;

/// Resume slot for one yielded command.
pub(crate) type CommandReply = oneshot::Sender<Result<CommandResult, ScenarioError>>;
pub(crate) type CommandRequest = (Command, CommandReply);

/// Outcome of a notification POST: the endpoint's response, or the delivery
/// failure. Scenarios decide whether a failure is fatal.
pub type DeliveryResult = Result<NotificationResponse, String>;

/// Handle a scenario yields commands through.
#[derive(Clone)]
pub struct ScenarioClient {
    commands: mpsc::Sender<CommandRequest>,
}

impl ScenarioClient {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<CommandRequest>) {
        let (commands, rx) = mpsc::channel(8);
        (Self { commands }, rx)
    }

    async fn run(&self, command: Command) -> Result<CommandResult, ScenarioError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send((command, reply_tx))
            .await
            .map_err(|_| ScenarioError::DriverGone)?;
        reply_rx.await.map_err(|_| ScenarioError::DriverGone)?
    }

    /// Request a new WebSocket. Fails if one is already attached.
    pub async fn connect(&self) -> Result<(), ScenarioError> {
        match self.run(Command::Connect).await? {
            CommandResult::Connected => Ok(()),
            _ => Err(ScenarioError::UnexpectedResult { command: "connect" }),
        }
    }

    /// Close the current WebSocket and wait for the close event.
    pub async fn disconnect(&self) -> Result<(), ScenarioError> {
        match self.run(Command::Disconnect).await? {
            CommandResult::Disconnected { .. } => Ok(()),
            _ => Err(ScenarioError::UnexpectedResult { command: "disconnect" }),
        }
    }

    /// Protocol handshake, optionally resuming an existing UAID.
    pub async fn hello(&self, uaid: Option<&str>) -> Result<HelloResponse, ScenarioError> {
        let command = Command::Hello {
            uaid: uaid.map(str::to_string),
        };
        match self.run(command).await? {
            CommandResult::Hello(response) => Ok(response),
            _ => Err(ScenarioError::UnexpectedResult { command: "hello" }),
        }
    }

    /// Request a push subscription for a channel.
    pub async fn register(&self, channel_id: &str) -> Result<RegisterResponse, ScenarioError> {
        self.register_with_key(channel_id, None).await
    }

    /// Request a restricted push subscription carrying the application
    /// server key.
    pub async fn register_with_key(
        &self,
        channel_id: &str,
        key: Option<&str>,
    ) -> Result<RegisterResponse, ScenarioError> {
        let command = Command::Register {
            channel_id: channel_id.to_string(),
            key: key.map(str::to_string),
        };
        match self.run(command).await? {
            CommandResult::Registered(response) => Ok(response),
            _ => Err(ScenarioError::UnexpectedResult { command: "register" }),
        }
    }

    /// Drop a subscription.
    pub async fn unregister(&self, channel_id: &str) -> Result<UnregisterResponse, ScenarioError> {
        let command = Command::Unregister {
            channel_id: channel_id.to_string(),
        };
        match self.run(command).await? {
            CommandResult::Unregistered(response) => Ok(response),
            _ => Err(ScenarioError::UnexpectedResult { command: "unregister" }),
        }
    }

    /// POST a notification to a push endpoint.
    pub async fn send_notification(
        &self,
        endpoint_url: &str,
        data: Option<Vec<u8>>,
        ttl: u32,
        claims: Option<Map<String, Value>>,
    ) -> Result<DeliveryResult, ScenarioError> {
        let command = Command::SendNotification {
            endpoint_url: endpoint_url.to_string(),
            data,
            ttl,
            claims,
        };
        match self.run(command).await? {
            CommandResult::Http(delivery) => Ok(delivery),
            _ => Err(ScenarioError::UnexpectedResult { command: "send_notification" }),
        }
    }

    /// Wait up to `time` for a notification on `channel_id`. Resumes with
    /// `None` when nothing arrives in time.
    pub async fn expect_notification(
        &self,
        channel_id: &str,
        time: Duration,
    ) -> Result<Option<Notification>, ScenarioError> {
        let command = Command::ExpectNotification {
            channel_id: channel_id.to_string(),
            time,
        };
        match self.run(command).await? {
            CommandResult::Notification(notification) => Ok(notification),
            _ => Err(ScenarioError::UnexpectedResult { command: "expect_notification" }),
        }
    }

    /// Wait up to `time` for a notification on any of `channel_ids`.
    pub async fn expect_notifications(
        &self,
        channel_ids: Vec<String>,
        time: Duration,
    ) -> Result<Option<Notification>, ScenarioError> {
        let command = Command::ExpectNotifications { channel_ids, time };
        match self.run(command).await? {
            CommandResult::Notification(notification) => Ok(notification),
            _ => Err(ScenarioError::UnexpectedResult { command: "expect_notifications" }),
        }
    }

    /// Acknowledge one delivered message. Fire-and-forget: the server sends
    /// no confirmation, so this resumes immediately.
    pub async fn ack(&self, channel_id: &str, version: &str) -> Result<(), ScenarioError> {
        let command = Command::Ack {
            channel_id: channel_id.to_string(),
            version: version.to_string(),
        };
        self.run(command).await.map(|_| ())
    }

    /// Suspend for a period of time.
    pub async fn wait(&self, time: Duration) -> Result<(), ScenarioError> {
        self.run(Command::Wait { time }).await.map(|_| ())
    }

    /// Suspend for whole seconds.
    pub async fn wait_secs(&self, secs: u64) -> Result<(), ScenarioError> {
        self.wait(Duration::from_secs(secs)).await
    }

    /// Open a metric timing bracket.
    pub async fn timer_start(&self, name: &str) -> Result<(), ScenarioError> {
        self.run(Command::TimerStart { name: name.to_string() })
            .await
            .map(|_| ())
    }

    /// Close a timing bracket, recording and returning the elapsed ms.
    pub async fn timer_end(&self, name: &str) -> Result<u64, ScenarioError> {
        match self.run(Command::TimerEnd { name: name.to_string() }).await? {
            CommandResult::TimerMs(ms) => Ok(ms),
            _ => Err(ScenarioError::UnexpectedResult { command: "timer_end" }),
        }
    }

    /// Record a metric counter.
    pub async fn counter(&self, name: &str, count: i64) -> Result<(), ScenarioError> {
        let command = Command::Counter {
            name: name.to_string(),
            count,
        };
        self.run(command).await.map(|_| ())
    }

    /// Launch additional scenarios on the running LoadRunner. Plan parse
    /// errors are fatal to the calling scenario.
    pub async fn spawn(&self, test_plan: &str) -> Result<(), ScenarioError> {
        let command = Command::Spawn {
            test_plan: test_plan.to_string(),
        };
        self.run(command).await.map(|_| ())
    }

    /// Run a nested scenario to completion, then resume.
    pub async fn run_scenario(
        &self,
        spec: &ScenarioSpec,
        args: ScenarioArgs,
    ) -> Result<(), ScenarioError> {
        let command = Command::SubScenario {
            func: spec.func.clone(),
            args,
        };
        self.run(command).await.map(|_| ())
    }
}
