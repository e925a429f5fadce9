//! The per-client scenario driver.
//!
//! A driver runs one scenario instance to completion. It owns the scenario
//! stack (sub-scenarios push frames), correlates inbound transport events
//! with the most recently issued command, buffers notifications for
//! `expect_notification*`, arms at most one timeout, and applies the restart
//! policy on uncaught scenario errors.
//!
//! Invariants kept here:
//! - at most one of {expecting, waiting, transport-awaited} at any instant,
//! - `connected ⇔ ws handle present`,
//! - a connection never outlives its driver, and teardown detaches before
//!   closing so the driver never sees the close it caused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use pushload_transport::wire::{ClientFrame, AckUpdate, Notification, ServerFrame};
use pushload_transport::ws::{WsClient, WsEvent};
use pushload_transport::NotificationRequest;

use crate::client::{CommandReply, CommandRequest, DeliveryResult, ScenarioClient};
use crate::command::{Command, CommandResult};
use crate::harness::HarnessHandle;
use crate::registry::{ScenarioFn, ScenarioSpec};
use crate::testplan::ScenarioArgs;
use crate::ScenarioError;

/// One suspended procedure on the scenario stack.
struct Frame {
    commands: mpsc::Receiver<CommandRequest>,
    done: JoinHandle<Result<(), ScenarioError>>,
    /// Resume slot of the parent's `SubScenario` command; `None` for the
    /// root procedure.
    resume_parent: Option<CommandReply>,
}

/// What one step of the driver loop observed.
enum Step {
    Command(Command, CommandReply),
    TopDone,
    Ws(WsEvent),
    Http(DeliveryResult),
    Timeout,
}

pub(crate) struct ScenarioDriver {
    harness: HarnessHandle,
    spec: Arc<ScenarioSpec>,
    args: ScenarioArgs,

    ws_tx: mpsc::Sender<WsEvent>,
    ws_rx: mpsc::Receiver<WsEvent>,
    http_tx: mpsc::Sender<DeliveryResult>,
    http_rx: mpsc::Receiver<DeliveryResult>,

    stack: Vec<Frame>,
    last_command: Option<&'static str>,
    /// Resume slot of the currently suspended command, when it awaits a
    /// transport event, an HTTP completion, or a timeout.
    pending: Option<CommandReply>,
    /// Channel IDs a pending `expect_notification*` will accept.
    expecting: Option<Vec<String>>,
    waiting: bool,
    connected: bool,
    ws: Option<WsClient>,
    notifications: Vec<Notification>,
    timers: HashMap<String, Instant>,
    deadline: Option<Instant>,
    current_try: u32,
}

impl ScenarioDriver {
    pub(crate) fn new(harness: HarnessHandle, spec: Arc<ScenarioSpec>, args: ScenarioArgs) -> Self {
        let (ws_tx, ws_rx) = mpsc::channel(64);
        let (http_tx, http_rx) = mpsc::channel(8);
        Self {
            harness,
            spec,
            args,
            ws_tx,
            ws_rx,
            http_tx,
            http_rx,
            stack: Vec::new(),
            last_command: None,
            pending: None,
            expecting: None,
            waiting: false,
            connected: false,
            ws: None,
            notifications: Vec::new(),
            timers: HashMap::new(),
            deadline: None,
            current_try: 0,
        }
    }

    /// Run the scenario, restarting per the retry budget, then report the
    /// driver as finished.
    pub(crate) async fn run(mut self) {
        loop {
            let result = self.run_once().await;
            self.drop_connection();
            match result {
                Ok(()) => {
                    tracing::debug!(scenario = %self.spec.name, "scenario finished");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        scenario = %self.spec.name,
                        last_command = self.last_command.unwrap_or("none"),
                        "scenario failed: {e}"
                    );
                    self.current_try += 1;
                    let retry = match self.spec.retries {
                        None => false,
                        Some(0) => true,
                        Some(budget) => self.current_try <= budget,
                    };
                    if !retry {
                        break;
                    }
                    self.reset();
                    tracing::debug!(
                        scenario = %self.spec.name,
                        attempt = self.current_try + 1,
                        "restarting scenario"
                    );
                }
            }
        }
        self.harness.driver_finished();
    }

    /// One attempt: start the root procedure and pump commands and events
    /// until the stack empties or an error escapes.
    async fn run_once(&mut self) -> Result<(), ScenarioError> {
        self.push_scenario(self.spec.func.clone(), self.args.clone(), None);
        loop {
            let step = {
                let top = self.stack.last_mut().expect("scenario stack is never empty mid-run");
                let deadline = self.deadline.unwrap_or_else(Instant::now);
                tokio::select! {
                    request = top.commands.recv() => match request {
                        Some((command, reply)) => Step::Command(command, reply),
                        None => Step::TopDone,
                    },
                    event = self.ws_rx.recv() => {
                        Step::Ws(event.expect("driver keeps a ws event sender"))
                    }
                    delivery = self.http_rx.recv() => {
                        Step::Http(delivery.expect("driver keeps an http result sender"))
                    }
                    _ = tokio::time::sleep_until(deadline), if self.deadline.is_some() => {
                        Step::Timeout
                    }
                }
            };

            match step {
                Step::Command(command, reply) => self.dispatch(command, reply).await,
                Step::TopDone => {
                    if self.finish_frame().await? {
                        return Ok(());
                    }
                }
                Step::Ws(event) => self.handle_ws_event(event)?,
                Step::Http(delivery) => self.resume(Ok(CommandResult::Http(delivery)))?,
                Step::Timeout => self.on_timeout()?,
            }
        }
    }

    fn push_scenario(
        &mut self,
        func: ScenarioFn,
        args: ScenarioArgs,
        resume_parent: Option<CommandReply>,
    ) {
        let (client, commands) = ScenarioClient::channel();
        let done = tokio::spawn(func(client, args));
        self.stack.push(Frame {
            commands,
            done,
            resume_parent,
        });
    }

    /// Top-of-stack procedure terminated: pop it and either resume the
    /// parent with a null result or report the root as finished.
    async fn finish_frame(&mut self) -> Result<bool, ScenarioError> {
        let frame = self.stack.pop().expect("finish_frame on empty stack");
        match frame.done.await {
            Ok(Ok(())) => match frame.resume_parent {
                Some(reply) => {
                    let _ = reply.send(Ok(CommandResult::None));
                    Ok(false)
                }
                None => Ok(true),
            },
            Ok(Err(e)) => Err(e),
            Err(join_error) => Err(ScenarioError::Failed(format!(
                "scenario task aborted: {join_error}"
            ))),
        }
    }

    async fn dispatch(&mut self, command: Command, reply: CommandReply) {
        let kind = command.kind();
        tracing::trace!(scenario = %self.spec.name, command = kind, "running command");
        if !matches!(command, Command::SubScenario { .. }) {
            self.last_command = Some(kind);
        }

        match command {
            Command::SubScenario { func, args } => {
                self.push_scenario(func, args, Some(reply));
            }
            Command::Connect => {
                if self.connected {
                    self.throw(reply, ScenarioError::AlreadyConnected);
                } else {
                    self.pending = Some(reply);
                    self.harness.connect(self.ws_tx.clone()).await;
                }
            }
            Command::Disconnect => match &self.ws {
                None => self.throw(reply, ScenarioError::NotConnected),
                Some(ws) => {
                    ws.close();
                    self.pending = Some(reply);
                }
            },
            Command::Hello { uaid } => {
                self.send_frame(ClientFrame::hello(uaid), reply, true);
            }
            Command::Register { channel_id, key } => {
                self.send_frame(ClientFrame::Register { channel_id, key }, reply, true);
            }
            Command::Unregister { channel_id } => {
                self.send_frame(ClientFrame::Unregister { channel_id }, reply, true);
            }
            Command::Ack { channel_id, version } => {
                // Acks are never confirmed by the server.
                let frame = ClientFrame::Ack {
                    updates: vec![AckUpdate { channel_id, version }],
                };
                self.send_frame(frame, reply, false);
            }
            Command::SendNotification {
                endpoint_url,
                data,
                ttl,
                claims,
            } => {
                self.pending = Some(reply);
                self.harness.send_notification(
                    NotificationRequest {
                        endpoint_url,
                        data,
                        ttl,
                        claims,
                    },
                    self.http_tx.clone(),
                );
            }
            Command::ExpectNotification { channel_id, time } => {
                self.expect(vec![channel_id], time, reply);
            }
            Command::ExpectNotifications { channel_ids, time } => {
                self.expect(channel_ids, time, reply);
            }
            Command::Wait { time } => {
                self.waiting = true;
                self.pending = Some(reply);
                self.deadline = Some(Instant::now() + time);
            }
            Command::TimerStart { name } => {
                if self.timers.contains_key(&name) {
                    self.throw(reply, ScenarioError::TimerAlreadyStarted(name));
                } else {
                    self.timers.insert(name, Instant::now());
                    let _ = reply.send(Ok(CommandResult::None));
                }
            }
            Command::TimerEnd { name } => match self.timers.remove(&name) {
                None => self.throw(reply, ScenarioError::TimerNotStarted(name)),
                Some(started) => {
                    let ms = started.elapsed().as_millis() as u64;
                    self.harness.record_timing(&name, ms);
                    let _ = reply.send(Ok(CommandResult::TimerMs(ms)));
                }
            },
            Command::Counter { name, count } => {
                self.harness.record_counter(&name, count);
                let _ = reply.send(Ok(CommandResult::None));
            }
            Command::Spawn { test_plan } => match self.harness.spawn_plan(&test_plan) {
                Ok(()) => {
                    let _ = reply.send(Ok(CommandResult::None));
                }
                Err(e) => self.throw(reply, e),
            },
        }
    }

    /// Send a frame on the attached socket. Awaited frames park the reply in
    /// the resume slot; fire-and-forget frames resume immediately.
    fn send_frame(&mut self, frame: ClientFrame, reply: CommandReply, awaited: bool) {
        let Some(ws) = &self.ws else {
            self.throw(reply, ScenarioError::NotConnected);
            return;
        };
        if let Err(e) = ws.send_json(&frame) {
            self.throw(reply, ScenarioError::Transport(e.to_string()));
            return;
        }
        if awaited {
            self.pending = Some(reply);
        } else {
            let _ = reply.send(Ok(CommandResult::None));
        }
    }

    /// `expect_notification*`: consume a buffered match synchronously (no
    /// timer armed), or park the expectation with a timeout.
    fn expect(&mut self, channel_ids: Vec<String>, time: Duration, reply: CommandReply) {
        if let Some(pos) = self
            .notifications
            .iter()
            .position(|n| channel_ids.contains(&n.channel_id))
        {
            let notification = self.notifications.remove(pos);
            let _ = reply.send(Ok(CommandResult::Notification(Some(notification))));
            return;
        }
        self.expecting = Some(channel_ids);
        self.pending = Some(reply);
        self.deadline = Some(Instant::now() + time);
    }

    fn handle_ws_event(&mut self, event: WsEvent) -> Result<(), ScenarioError> {
        match event {
            WsEvent::Frame(ServerFrame::Notification(notification)) => {
                tracing::trace!(
                    scenario = %self.spec.name,
                    channel = %notification.channel_id,
                    "notification buffered"
                );
                self.notifications.push(notification);
                if let Some(ids) = &self.expecting {
                    if let Some(pos) = self
                        .notifications
                        .iter()
                        .position(|n| ids.contains(&n.channel_id))
                    {
                        let notification = self.notifications.remove(pos);
                        self.expecting = None;
                        self.deadline = None;
                        return self.resume(Ok(CommandResult::Notification(Some(notification))));
                    }
                }
                Ok(())
            }
            WsEvent::Connected(client) => {
                if self.last_command != Some("connect") {
                    return self.unexpected("connect");
                }
                self.connected = true;
                self.ws = Some(client);
                self.resume(Ok(CommandResult::Connected))
            }
            WsEvent::Closed {
                was_clean,
                code,
                reason,
            } => {
                self.connected = false;
                self.ws = None;
                if self.last_command != Some("disconnect") {
                    return self.unexpected(&format!("disconnect ({reason})"));
                }
                self.resume(Ok(CommandResult::Disconnected {
                    was_clean,
                    code,
                    reason,
                }))
            }
            WsEvent::Error(error) => self.unexpected(&format!("error: {error}")),
            WsEvent::Frame(frame) => {
                let message_type = frame.message_type();
                if self.last_command != Some(message_type) {
                    return self.unexpected(message_type);
                }
                let result = match frame {
                    ServerFrame::Hello(hello) => CommandResult::Hello(hello),
                    ServerFrame::Register(register) => CommandResult::Registered(register),
                    ServerFrame::Unregister(unregister) => CommandResult::Unregistered(unregister),
                    ServerFrame::Notification(_) => unreachable!("handled above"),
                };
                self.resume(Ok(result))
            }
        }
    }

    /// An event that does not match the last command is thrown into the
    /// scenario; with nothing suspended to throw into it is driver-fatal.
    fn unexpected(&mut self, event: &str) -> Result<(), ScenarioError> {
        let error = ScenarioError::UnexpectedEvent {
            last_command: self.last_command.unwrap_or("none").to_string(),
            event: event.to_string(),
        };
        match self.pending.take() {
            Some(reply) => {
                self.clear_wait_state();
                self.drop_connection();
                let _ = reply.send(Err(error));
                Ok(())
            }
            None => Err(error),
        }
    }

    fn on_timeout(&mut self) -> Result<(), ScenarioError> {
        self.deadline = None;
        if self.expecting.take().is_some() {
            // Absence of a notification is a legitimate answer.
            return self.resume(Ok(CommandResult::Notification(None)));
        }
        if self.waiting {
            self.waiting = false;
            return self.resume(Ok(CommandResult::None));
        }
        Ok(())
    }

    fn resume(&mut self, result: Result<CommandResult, ScenarioError>) -> Result<(), ScenarioError> {
        match self.pending.take() {
            Some(reply) => {
                let _ = reply.send(result);
                Ok(())
            }
            None => Err(ScenarioError::Failed(format!(
                "nothing suspended to resume (last command: {})",
                self.last_command.unwrap_or("none")
            ))),
        }
    }

    /// Inject an error at the current suspension point, dropping any live
    /// connection first (detach, then close, so the close event never comes
    /// back).
    fn throw(&mut self, reply: CommandReply, error: ScenarioError) {
        self.drop_connection();
        let _ = reply.send(Err(error));
    }

    fn drop_connection(&mut self) {
        if let Some(ws) = self.ws.take() {
            ws.detach();
            ws.close();
        }
        self.connected = false;
    }

    fn clear_wait_state(&mut self) {
        self.expecting = None;
        self.waiting = false;
        self.deadline = None;
    }

    /// Reset for a restart: discard buffered state, pending resume slots and
    /// any stale events still queued from the dropped connection.
    fn reset(&mut self) {
        self.stack.clear();
        self.last_command = None;
        self.pending = None;
        self.clear_wait_state();
        self.notifications.clear();
        self.timers.clear();
        while self.ws_rx.try_recv().is_ok() {}
        while self.http_rx.try_recv().is_ok() {}
    }
}
