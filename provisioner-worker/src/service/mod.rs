//! Service layer
//!
//! Services hold the worker's task logic: routing a task to its handler,
//! turning the outcome into the result reported to the server, and the
//! one-shot register and task-file modes.
//!
//! Dispatch is trait-based so the poll loop can be tested with a fake.

pub mod dispatch;
pub mod modes;
pub mod report;

// Re-export traits
pub use dispatch::TaskDispatcher;

// Re-export implementations
pub use dispatch::StandardDispatcher;
pub use report::{execute_task, rejected_result};
