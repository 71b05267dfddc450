//! Handlers shipped with the worker
//!
//! - [`ShellAutomator`]: shell commands on the target node over SSH
//! - [`ExternalProvider`] / [`ExternalAutomator`]: a separately built
//!   executable speaking JSON over stdin/stdout

mod external;
mod shell;

pub use external::{ExternalAutomator, ExternalProvider};
pub use shell::ShellAutomator;
