//! Structured command failure

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A command that ran to completion (or was killed) with a non-zero outcome.
///
/// This is the uniform shape through which any remote or plugin-process
/// command failure surfaces. `message` is the caller's description of the
/// command and defaults to the command text itself.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CommandExecutionError {
    pub message: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never reported an exit status
    pub exit_code: Option<i32>,
    /// Signal name when the process was terminated by a signal
    pub exit_signal: Option<String>,
}

impl CommandExecutionError {
    pub fn new(
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
        exit_signal: Option<String>,
    ) -> Self {
        let command = command.into();
        Self {
            message: command.clone(),
            command,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            exit_signal,
        }
    }

    /// Replaces the human-readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults_to_command() {
        let err = CommandExecutionError::new("which chef-solo", "", "not found", Some(1), None);
        assert_eq!(err.to_string(), "which chef-solo");
        assert_eq!(err.exit_code, Some(1));

        let err = err.with_message("Checking if chef-solo is present");
        assert_eq!(err.to_string(), "Checking if chef-solo is present");
        assert_eq!(err.command, "which chef-solo");
    }

    #[test]
    fn test_serializes_all_fields() {
        let err = CommandExecutionError::new("sleep 100", "", "", None, Some("KILL".to_string()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["command"], "sleep 100");
        assert_eq!(json["exit_code"], serde_json::Value::Null);
        assert_eq!(json["exit_signal"], "KILL");
    }
}
