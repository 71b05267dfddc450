//! Plugin errors
//!
//! [`RegistryError`] covers discovery and lookup; [`PluginError`] covers
//! everything a handler can fail with while running a task.

use std::path::PathBuf;

use provisioner_core::domain::command::CommandExecutionError;
use provisioner_core::domain::plugin::{ManifestError, PluginKind};
use thiserror::Error;

use crate::remote::RemoteError;

/// Errors raised while loading plugins or resolving plugin types
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read plugin manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin manifest {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid plugin manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("plugin {plugin}: {kind} type \"{type_name}\" names unknown handler class {classname}")]
    UnknownClass {
        plugin: String,
        kind: PluginKind,
        type_name: String,
        classname: String,
    },

    #[error(
        "plugin {plugin}: class {classname} for {kind} type \"{type_name}\" is not a {kind} handler"
    )]
    CapabilityMismatch {
        plugin: String,
        kind: PluginKind,
        type_name: String,
        classname: String,
    },

    #[error("plugin {plugin}: {kind} type \"{type_name}\" is already registered by plugin {existing}")]
    DuplicateType {
        plugin: String,
        kind: PluginKind,
        type_name: String,
        existing: String,
    },

    #[error("{kind} type \"{type_name}\" is not registered")]
    UnregisteredType { kind: PluginKind, type_name: String },

    #[error("failed to register {kind} type \"{type_name}\": {message}")]
    Registration {
        kind: PluginKind,
        type_name: String,
        message: String,
    },
}

/// Errors raised by handlers while executing an operation
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{operation} is not implemented by {classname}")]
    Unimplemented {
        classname: String,
        operation: &'static str,
    },

    #[error("no {kind} handler named {classname}")]
    UnknownHandler { kind: PluginKind, classname: String },

    #[error(transparent)]
    Command(#[from] CommandExecutionError),

    #[error(transparent)]
    Remote(RemoteError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{classname} timed out after {timeout_secs}s")]
    Timeout { classname: String, timeout_secs: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    pub fn unimplemented(classname: impl Into<String>, operation: &'static str) -> Self {
        Self::Unimplemented {
            classname: classname.into(),
            operation,
        }
    }

    /// The structured command failure behind this error, if any
    pub fn command_error(&self) -> Option<&CommandExecutionError> {
        match self {
            Self::Command(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RemoteError> for PluginError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Command(command) => Self::Command(command),
            other => Self::Remote(other),
        }
    }
}
