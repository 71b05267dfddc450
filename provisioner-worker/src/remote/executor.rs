//! One-shot command execution over an established session

use provisioner_core::domain::command::CommandExecutionError;
use tracing::debug;

use crate::remote::RemoteError;

/// Longest transcript prefix written to the debug log
const LOG_TRANSCRIPT_LIMIT: usize = 4096;

/// Raw outcome of one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the remote side never sent an exit status
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
}

/// Captured output of a command that exited 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub exit_signal: Option<String>,
}

/// An authenticated remote shell able to run commands
pub trait RemoteSession {
    /// Runs `command` on a fresh channel, optionally with a pseudo-terminal.
    ///
    /// Failing to obtain a requested pty is an error.
    fn run(&mut self, command: &str, pty: bool) -> Result<ChannelOutput, RemoteError>;
}

/// Runs `command` and fails unless it exits with status 0.
///
/// `description` becomes the failure message and defaults to the command.
/// Commands and transcripts are logged at debug level and may contain
/// credentials.
pub fn ssh_exec(
    session: &mut dyn RemoteSession,
    command: &str,
    description: Option<&str>,
    pty: bool,
) -> Result<CommandOutcome, RemoteError> {
    if let Some(description) = description {
        debug!("{}", description);
    }
    debug!(command, pty, "ssh exec");

    let output = session.run(command, pty)?;

    debug!(
        exit_code = ?output.exit_code,
        exit_signal = ?output.exit_signal,
        stdout = truncate(&output.stdout),
        stderr = truncate(&output.stderr),
        "ssh exec finished"
    );

    match output.exit_code {
        Some(0) => Ok(CommandOutcome {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: 0,
            exit_signal: output.exit_signal,
        }),
        exit_code => {
            let err = CommandExecutionError::new(
                command,
                output.stdout,
                output.stderr,
                exit_code,
                output.exit_signal,
            );
            Err(match description {
                Some(description) => err.with_message(description),
                None => err,
            }
            .into())
        }
    }
}

fn truncate(text: &str) -> &str {
    if text.len() <= LOG_TRANSCRIPT_LIMIT {
        return text;
    }
    let mut end = LOG_TRANSCRIPT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
