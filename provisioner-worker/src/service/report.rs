//! Result building
//!
//! Every dispatched task produces exactly one [`TaskResult`]: the handler's
//! output on success, or a failing output carrying either the command
//! transcript or the error chain.

use std::error::Error;
use std::sync::Arc;

use provisioner_core::domain::result::{Correlation, TaskOutput, TaskResult};
use provisioner_core::domain::task::Task;
use tracing::{Instrument, error, info, info_span};

use crate::service::dispatch::{DispatchError, TaskDispatcher};

/// Dispatches `task` inside a span carrying its identifiers and builds the
/// result to report. Never fails: dispatch errors become failing results.
pub async fn execute_task(
    dispatcher: &dyn TaskDispatcher,
    task: Arc<Task>,
    correlation: Correlation,
) -> TaskResult {
    let span = info_span!(
        "task",
        task_id = %task.task_id,
        task_name = %task.task_name,
        cluster_id = %task.cluster_id
    );

    async move {
        info!("Running task");
        let output = match dispatcher.dispatch(task).await {
            Ok(output) => {
                info!(status = output.status, "Task finished");
                output
            }
            Err(e) => {
                error!("Task failed: {}", e);
                failure_output(&e)
            }
        };
        TaskResult::new(output, correlation)
    }
    .instrument(span)
    .await
}

/// Failing result for a task that was acquired but could not be read
pub fn rejected_result(message: &str, correlation: Correlation) -> TaskResult {
    error!(task_id = %correlation.task_id, "Task rejected: {}", message);
    TaskResult::new(TaskOutput::failure(message, message, message), correlation)
}

/// Failing output for a dispatch error
///
/// Command failures keep their transcript; anything else reports its
/// message on stdout and the message plus source chain on stderr.
pub fn failure_output(err: &DispatchError) -> TaskOutput {
    if let Some(command) = err.command_error() {
        return TaskOutput::command_failure(command);
    }

    let message = err.to_string();
    let mut chain = message.clone();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    TaskOutput::failure(message.clone(), message, chain)
}
