//! Scheduler layer for the worker
//!
//! Polls the server for tasks and drives each one through dispatch and
//! reporting, one at a time.

pub mod poller;

pub use poller::{PollDelays, TaskPoller, WorkerIdentity};
