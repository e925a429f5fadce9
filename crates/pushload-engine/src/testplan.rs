//! Test-plan grammar.
//!
//! `"<mod:func>, <quantity>, <stagger>, <delay>[, <arg>...][ | ...]"` —
//! entries separated by `|`, fields by commas (escapable with a backslash).
//! The first field names a scenario, the next three are integers, the rest
//! become scenario arguments: integers where possible, JSON objects merge
//! into keyword arguments, JSON arrays extend the positional list.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::registry::{ScenarioRegistry, ScenarioSpec};
use crate::ScenarioError;

/// One positional scenario argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioArg {
    Int(i64),
    Str(String),
}

/// Arguments handed to each scenario instance.
#[derive(Debug, Clone, Default)]
pub struct ScenarioArgs {
    pub positional: Vec<ScenarioArg>,
    pub keyword: Map<String, Value>,
}

impl ScenarioArgs {
    /// An integer argument: positional `idx` first, then keyword `name`,
    /// then the default.
    pub fn get_u64(&self, idx: usize, name: &str, default: u64) -> u64 {
        if let Some(ScenarioArg::Int(value)) = self.positional.get(idx) {
            if *value >= 0 {
                return *value as u64;
            }
        }
        self.keyword
            .get(name)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    /// An integer argument read as a flag (non-zero = set).
    pub fn get_flag(&self, idx: usize, name: &str) -> bool {
        self.get_u64(idx, name, 0) != 0
    }

    /// A keyword string argument.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.keyword.get(name).and_then(Value::as_str)
    }

    /// The `vapid_claims` keyword argument, when present and an object.
    pub fn vapid_claims(&self) -> Option<Map<String, Value>> {
        self.keyword
            .get("vapid_claims")
            .and_then(Value::as_object)
            .cloned()
    }
}

/// One parsed test-plan entry.
#[derive(Clone)]
pub struct TestPlanEntry {
    pub scenario: Arc<ScenarioSpec>,
    pub quantity: u32,
    pub stagger: u32,
    pub delay: u64,
    pub args: ScenarioArgs,
}

/// Parse a full plan string into entries, resolving scenario references.
pub fn parse_test_plan(
    registry: &ScenarioRegistry,
    plan: &str,
) -> Result<Vec<TestPlanEntry>, ScenarioError> {
    let mut entries = Vec::new();
    for part in plan.split('|') {
        entries.push(parse_entry(registry, part)?);
    }
    Ok(entries)
}

fn parse_entry(registry: &ScenarioRegistry, entry: &str) -> Result<TestPlanEntry, ScenarioError> {
    let fields = split_fields(entry);
    if fields.is_empty() {
        return Err(ScenarioError::TestPlan("empty entry".to_string()));
    }
    let reference = &fields[0];
    let scenario = registry.lookup(reference)?;

    if fields.len() < 4 {
        return Err(ScenarioError::TestPlan(format!(
            "plan for {reference} needs quantity, stagger and delay, got {} fields",
            fields.len() - 1
        )));
    }
    let quantity = parse_int(&fields[1], "quantity", reference)?;
    let stagger = parse_int(&fields[2], "stagger", reference)?;
    let delay = parse_int(&fields[3], "delay", reference)? as u64;
    if stagger == 0 {
        return Err(ScenarioError::TestPlan(format!(
            "plan for {reference} has zero stagger"
        )));
    }

    Ok(TestPlanEntry {
        scenario,
        quantity,
        stagger,
        delay,
        args: coerce_args(&fields[4..]),
    })
}

fn parse_int(field: &str, what: &str, reference: &str) -> Result<u32, ScenarioError> {
    field.parse().map_err(|_| {
        ScenarioError::TestPlan(format!(
            "plan for {reference}: {what} must be a non-negative integer, got `{field}`"
        ))
    })
}

/// Split an entry on commas, honoring `\,` escapes, trimming each field.
fn split_fields(entry: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = entry.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                chars.next();
                current.push(',');
            }
            ',' => {
                fields.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() || !fields.is_empty() {
        fields.push(last.to_string());
    }
    fields.retain(|f| !f.is_empty());
    fields
}

/// Coerce raw argument fields into positional/keyword scenario arguments.
pub fn coerce_args(fields: &[String]) -> ScenarioArgs {
    let mut args = ScenarioArgs::default();
    for field in fields {
        if let Ok(value) = serde_json::from_str::<Value>(field) {
            match value {
                Value::Object(map) => {
                    args.keyword.extend(map);
                    continue;
                }
                Value::Array(items) => {
                    for item in items {
                        args.positional.push(match item {
                            Value::Number(n) if n.is_i64() => {
                                ScenarioArg::Int(n.as_i64().unwrap_or_default())
                            }
                            Value::String(s) => ScenarioArg::Str(s),
                            other => ScenarioArg::Str(other.to_string()),
                        });
                    }
                    continue;
                }
                _ => {}
            }
        }
        match field.parse::<i64>() {
            Ok(value) => args.positional.push(ScenarioArg::Int(value)),
            Err(_) => args.positional.push(ScenarioArg::Str(field.clone())),
        }
    }
    args
}
