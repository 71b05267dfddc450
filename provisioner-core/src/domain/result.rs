//! Task result types
//!
//! [`TaskOutput`] is the accumulator a plugin fills while it runs.
//! [`TaskResult`] is what the worker sends back to the server: the output
//! plus the correlation identifiers the worker owns.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::command::CommandExecutionError;
use crate::merge::merge_maps;

/// Keys owned by the worker; plugins cannot set them.
pub const CORRELATION_KEYS: [&str; 4] = ["workerId", "taskId", "provisionerId", "tenantId"];

/// Outcome accumulated by a plugin while executing one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// 0 on success, non-zero on failure
    #[serde(default)]
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Data consumed by subsequent tasks (provider ids, host keys, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub result: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A failing output carrying a transcript
    pub fn failure(
        message: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            status: 1,
            message: Some(message.into()),
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
            ..Self::default()
        }
    }

    /// A failing output for a command that exited non-zero
    pub fn command_failure(err: &CommandExecutionError) -> Self {
        Self::failure(err.message.clone(), err.stdout.clone(), err.stderr.clone())
    }

    /// Sets a value under `result` at a nested key path, creating
    /// intermediate objects as needed.
    ///
    /// A non-object value sitting on the path is replaced by an object.
    pub fn set_result<V: Into<Value>>(&mut self, path: &[&str], value: V) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut node = &mut self.result;
        for key in parents {
            let entry = node
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        node.insert(last.to_string(), value.into());
    }

    /// Reads a value under `result` at a nested key path
    pub fn get_result(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.result.get(*first)?, |value, key| value.get(*key))
    }

    /// Merges a later output into this one; later values win on conflicts,
    /// except `status`, which keeps the first non-zero value.
    pub fn merge(&mut self, later: TaskOutput) {
        if self.status == 0 {
            self.status = later.status;
        }
        if later.message.is_some() {
            self.message = later.message;
        }
        if later.stdout.is_some() {
            self.stdout = later.stdout;
        }
        if later.stderr.is_some() {
            self.stderr = later.stderr;
        }
        merge_maps(&mut self.result, later.result);
        merge_maps(&mut self.extra, later.extra);
    }
}

/// Correlation identifiers attached to every reported result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub worker_id: String,
    pub task_id: String,
    pub provisioner_id: String,
    pub tenant_id: String,
}

/// Result document posted to the server's finish endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    #[serde(flatten)]
    pub output: TaskOutput,
    #[serde(flatten)]
    pub correlation: Correlation,
}

impl TaskResult {
    pub fn new(mut output: TaskOutput, correlation: Correlation) -> Self {
        for key in CORRELATION_KEYS {
            output.extra.remove(key);
        }
        Self {
            output,
            correlation,
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.status == 0
    }
}
