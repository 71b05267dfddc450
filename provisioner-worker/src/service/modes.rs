//! One-shot run modes
//!
//! Plugin type registration and single task files. Both hand their outcome
//! back to `main`, which only prints it and picks the exit code.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use provisioner_core::domain::result::TaskResult;
use provisioner_core::domain::task::Task;
use serde_json::Value;
use tracing::{error, info};

use crate::plugin::PluginRegistry;
use crate::repository::PluginRepository;
use crate::scheduler::WorkerIdentity;
use crate::service::report::{execute_task, rejected_result};
use crate::service::TaskDispatcher;

/// Error counts of a registration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationSummary {
    pub load_errors: usize,
    pub registration_errors: usize,
}

impl RegistrationSummary {
    pub fn is_complete(&self) -> bool {
        self.load_errors == 0 && self.registration_errors == 0
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_complete() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

/// Registers every loaded type; manifests that failed to load count as
/// errors too.
pub async fn register_types(
    registry: &PluginRegistry,
    repository: &dyn PluginRepository,
) -> RegistrationSummary {
    let errors = registry.register_plugins(repository).await;
    let summary = RegistrationSummary {
        load_errors: registry.load_errors().len(),
        registration_errors: errors.len(),
    };

    if summary.is_complete() {
        info!("All plugin types registered");
    } else {
        error!(
            "Registration incomplete: {} manifest error(s), {} registration error(s)",
            summary.load_errors, summary.registration_errors
        );
    }
    summary
}

/// A task file that could not be turned into a [`Task`]
struct UnreadableTask {
    task_id: String,
    message: String,
}

/// Runs the task stored at `path`
///
/// A file that cannot be read or parsed still yields a failing result,
/// carrying the document's `taskId` when one is readable.
pub async fn run_task_file(
    path: &Path,
    dispatcher: &dyn TaskDispatcher,
    identity: &WorkerIdentity,
) -> TaskResult {
    match read_task_file(path).await {
        Ok(task) => {
            let correlation = identity.correlation(&task);
            execute_task(dispatcher, Arc::new(task), correlation).await
        }
        Err(unreadable) => rejected_result(
            &unreadable.message,
            identity.correlation_for(&unreadable.task_id),
        ),
    }
}

async fn read_task_file(path: &Path) -> Result<Task, UnreadableTask> {
    let unreadable = |task_id: &str, message: String| UnreadableTask {
        task_id: task_id.to_string(),
        message,
    };

    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        unreadable("", format!("Failed to read task file {}: {}", path.display(), e))
    })?;
    let document: Value = serde_json::from_str(&text).map_err(|e| {
        unreadable("", format!("Failed to parse task file {}: {}", path.display(), e))
    })?;

    let task_id = Task::raw_id(&document).unwrap_or_default().to_string();
    serde_json::from_value(document).map_err(|e| {
        unreadable(
            &task_id,
            format!("Invalid task document in {}: {}", path.display(), e),
        )
    })
}
