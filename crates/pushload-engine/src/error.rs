/// Errors thrown into scenarios and raised by the engine.
///
/// Any of these escaping a scenario triggers the driver's restart policy;
/// scenarios are free to catch and continue instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScenarioError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("unexpected `{event}` event; last command was `{last_command}`")]
    UnexpectedEvent { last_command: String, event: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("timer `{0}` was already started")]
    TimerAlreadyStarted(String),

    #[error("timer `{0}` was never started")]
    TimerNotStarted(String),

    #[error("bad test plan: {0}")]
    TestPlan(String),

    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),

    #[error("driver is gone")]
    DriverGone,

    #[error("unexpected result for `{command}` command")]
    UnexpectedResult { command: &'static str },

    #[error("{0}")]
    Failed(String),
}

impl ScenarioError {
    /// A scenario-level assertion failure.
    pub fn failed(message: impl Into<String>) -> Self {
        ScenarioError::Failed(message.into())
    }
}
