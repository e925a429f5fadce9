//! Named scenarios.
//!
//! Test plans reference scenarios as `module:function` strings. There is no
//! runtime import machinery, so references resolve against a registry of
//! [`ScenarioSpec`]s; bare names default to the built-in `scenarios:` module.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::client::ScenarioClient;
use crate::testplan::ScenarioArgs;
use crate::ScenarioError;

pub type ScenarioFuture = BoxFuture<'static, Result<(), ScenarioError>>;

/// A scenario procedure: invoked once per driver attempt.
pub type ScenarioFn =
    Arc<dyn Fn(ScenarioClient, ScenarioArgs) -> ScenarioFuture + Send + Sync>;

/// A registered scenario: its name, restart budget, and procedure.
#[derive(Clone)]
pub struct ScenarioSpec {
    pub name: String,
    /// `None`: no restart. `Some(0)`: restart forever. `Some(n)`: restart up
    /// to n times after an uncaught scenario error.
    pub retries: Option<u32>,
    pub func: ScenarioFn,
}

impl ScenarioSpec {
    pub fn new<F, Fut>(name: &str, func: F) -> Self
    where
        F: Fn(ScenarioClient, ScenarioArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ScenarioError>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            retries: None,
            func: Arc::new(move |client, args| Box::pin(func(client, args))),
        }
    }

    /// Restart budget on uncaught errors; `0` restarts forever.
    pub fn with_retries(mut self, tries: u32) -> Self {
        self.retries = Some(tries);
        self
    }
}

/// Lookup table from scenario references to specs.
#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: HashMap<String, Arc<ScenarioSpec>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in scenarios.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::scenarios::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, spec: ScenarioSpec) {
        self.scenarios.insert(spec.name.clone(), Arc::new(spec));
    }

    /// Resolve a `module:function` reference. A bare function name is looked
    /// up in the built-in `scenarios:` module.
    pub fn lookup(&self, reference: &str) -> Result<Arc<ScenarioSpec>, ScenarioError> {
        if let Some(spec) = self.scenarios.get(reference) {
            return Ok(spec.clone());
        }
        if !reference.contains(':') {
            if let Some(spec) = self.scenarios.get(&format!("scenarios:{reference}")) {
                return Ok(spec.clone());
            }
        }
        Err(ScenarioError::UnknownScenario(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_client: ScenarioClient, _args: ScenarioArgs) -> Result<(), ScenarioError> {
        Ok(())
    }

    #[test]
    fn bare_names_default_to_scenarios_module() {
        let mut registry = ScenarioRegistry::new();
        registry.register(ScenarioSpec::new("scenarios:noop", noop));

        assert!(registry.lookup("scenarios:noop").is_ok());
        assert!(registry.lookup("noop").is_ok());
        assert!(matches!(
            registry.lookup("other:noop"),
            Err(ScenarioError::UnknownScenario(_))
        ));
    }

    #[test]
    fn retries_budget_is_carried() {
        let spec = ScenarioSpec::new("scenarios:noop", noop).with_retries(2);
        assert_eq!(spec.retries, Some(2));
        assert!(ScenarioSpec::new("scenarios:noop", noop).retries.is_none());
    }
}
