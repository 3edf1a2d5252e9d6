//! Per-execution context: variables, step outputs and step history.
//!
//! Keys keep insertion order (serde_json is built with `preserve_order`), so
//! two executions that apply the same steps export identical JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use kgflow_core::StepErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Why a step failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
}

/// Standardized outcome of one step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<StepFailure>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "one")]
    pub attempts: u32,
}

fn one() -> u32 {
    1
}

impl StepResult {
    pub fn ok(step_id: impl Into<String>, data: Value, duration_ms: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            duration_ms,
            data: Some(data),
            error: None,
            timestamp,
            attempts: 1,
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        kind: StepErrorKind,
        message: impl Into<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            duration_ms,
            data: None,
            error: Some(StepFailure { kind, message: message.into() }),
            timestamp,
            attempts: 1,
        }
    }

    /// Data a failing handler still produced (e.g. a non-2xx response).
    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ContextInit {
    pub workflow_id: String,
    pub inputs: Map<String, Value>,
    pub start_time: DateTime<Utc>,
}

/// Restorable copy of the mutable parts of a context.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextSnapshot {
    variables: Map<String, Value>,
    outputs: Map<String, Value>,
    history_len: usize,
}

#[derive(Clone, Debug)]
pub struct ExecutionContext {
    workflow_id: String,
    start_time: DateTime<Utc>,
    variables: Map<String, Value>,
    outputs: Map<String, Value>,
    history: Vec<StepResult>,
}

impl ExecutionContext {
    pub fn init(init: ContextInit) -> Self {
        Self {
            workflow_id: init.workflow_id,
            start_time: init.start_time,
            variables: init.inputs,
            outputs: Map::new(),
            history: Vec::new(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Dotted lookup (`a.b.0`). The first segment is a variable or, failing
    /// that, a step output; later segments index objects and arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut value = self.variables.get(head).or_else(|| self.outputs.get(head))?;
        for segment in segments {
            value = match value {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn set_output(&mut self, step_name: impl Into<String>, value: Value) {
        self.outputs.insert(step_name.into(), value);
    }

    pub fn get_output(&self, step_name: &str) -> Option<&Value> {
        self.outputs.get(step_name)
    }

    pub fn record(&mut self, result: StepResult) {
        self.history.push(result);
    }

    pub fn history(&self) -> &[StepResult] {
        &self.history
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            variables: self.variables.clone(),
            outputs: self.outputs.clone(),
            history_len: self.history.len(),
        }
    }

    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.variables = snapshot.variables;
        self.outputs = snapshot.outputs;
        self.history.truncate(snapshot.history_len);
    }

    /// Copies `entries` into the variables. Existing keys are kept unless
    /// `overwrite`; returns how many keys were written.
    pub fn merge(&mut self, entries: Map<String, Value>, overwrite: bool) -> usize {
        let mut written = 0;
        for (key, value) in entries {
            if overwrite || !self.variables.contains_key(&key) {
                self.variables.insert(key, value);
                written += 1;
            }
        }
        written
    }

    pub fn export(&self, include_history: bool) -> Value {
        let mut out = json!({
            "workflowId": self.workflow_id,
            "startTime": self.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            "variables": self.variables,
            "outputs": self.outputs,
        });
        if include_history {
            if let Value::Object(map) = &mut out {
                map.insert("history".to_string(), serde_json::to_value(&self.history).unwrap_or(Value::Null));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> ExecutionContext {
        let mut inputs = Map::new();
        inputs.insert("z".into(), json!(1));
        inputs.insert("a".into(), json!({"b": [10, 20]}));
        ExecutionContext::init(ContextInit {
            workflow_id: "ex:wf".into(),
            inputs,
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn insertion_order_survives_export() {
        let mut c = ctx();
        c.set("m", json!("x"));
        let text = serde_json::to_string(&c.export(false)).unwrap();
        assert!(text.find("\"z\"").unwrap() < text.find("\"a\"").unwrap());
        assert!(text.find("\"a\"").unwrap() < text.find("\"m\"").unwrap());
        assert!(text.contains("\"startTime\":\"2024-01-01T00:00:00.000Z\""));
    }

    #[test]
    fn dotted_lookup_reaches_outputs() {
        let mut c = ctx();
        c.set_output("stepA", json!({"count": 2}));
        assert_eq!(c.lookup("a.b.1"), Some(&json!(20)));
        assert_eq!(c.lookup("stepA.count"), Some(&json!(2)));
        assert_eq!(c.lookup("missing"), None);
    }

    #[test]
    fn snapshot_restore_and_merge() {
        let mut c = ctx();
        let snap = c.snapshot();
        c.set("z", json!(99));
        c.record(StepResult::ok("s", json!({}), 0, c.start_time()));
        c.restore(snap);
        assert_eq!(c.get("z"), Some(&json!(1)));
        assert!(c.history().is_empty());

        let mut extra = Map::new();
        extra.insert("z".into(), json!(2));
        extra.insert("y".into(), json!(3));
        assert_eq!(c.merge(extra.clone(), false), 1);
        assert_eq!(c.get("z"), Some(&json!(1)));
        assert_eq!(c.merge(extra, true), 2);
        assert_eq!(c.get("z"), Some(&json!(2)));
    }
}
