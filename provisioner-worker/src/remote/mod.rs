//! Remote command execution
//!
//! [`executor::ssh_exec`] runs one command through a [`RemoteSession`] and
//! turns a non-zero exit into a [`CommandExecutionError`]. The SSH session
//! itself and the key helpers plugins build on live beside it.

pub mod executor;
pub mod keys;
pub mod ssh;

pub use executor::{RemoteSession, ssh_exec};
pub use keys::{ssh_keyscan, write_ssh_key_file};
pub use ssh::{SshAuth, SshSession};

use provisioner_core::domain::command::CommandExecutionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication as {user} on {host} failed")]
    AuthFailed { host: String, user: String },

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("no pty available: {0}")]
    Pty(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid ssh credentials: {0}")]
    InvalidAuth(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("Unknown SSH Key Type: {key_type} (host {host})")]
    UnknownKeyType { host: String, key_type: String },

    #[error(transparent)]
    Command(#[from] CommandExecutionError),
}
