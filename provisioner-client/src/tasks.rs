//! Task-related API endpoints

use crate::ServerClient;
use crate::error::{ClientError, Result};
use provisioner_core::domain::result::TaskResult;
use provisioner_core::domain::task::Task;
use provisioner_core::dto::task::TakeTaskRequest;
use reqwest::StatusCode;
use serde_json::Value;

/// Outcome of a `take` request that reached the server
#[derive(Debug, Clone, PartialEq)]
pub enum TakeResponse {
    /// The server granted a task
    Task(Task),
    /// The server granted a task whose document does not fit [`Task`]; it
    /// still has to be reported, as a failure
    Rejected { task_id: String, message: String },
    /// No task is currently queued for this worker
    NoTask,
    /// Any other status, or a 200 without a body
    Unexpected { status: u16, body: String },
}

impl ServerClient {
    // =============================================================================
    // Task Lifecycle
    // =============================================================================

    /// Ask the server for the next task
    ///
    /// Transport failures and task documents without a readable `taskId` are
    /// errors; every HTTP status is otherwise reported through
    /// [`TakeResponse`].
    ///
    /// # Example
    /// ```no_run
    /// # use provisioner_client::{ServerClient, TakeResponse};
    /// # use provisioner_core::dto::task::TakeTaskRequest;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = ServerClient::new("http://localhost:55054");
    /// let request = TakeTaskRequest {
    ///     provisioner_id: "master".to_string(),
    ///     worker_id: "host.1234".to_string(),
    ///     tenant_id: "superadmin".to_string(),
    /// };
    /// match client.take_task(&request).await? {
    ///     TakeResponse::Task(task) => println!("got {}", task.task_id),
    ///     TakeResponse::Rejected { task_id, message } => println!("bad {task_id}: {message}"),
    ///     TakeResponse::NoTask => println!("idle"),
    ///     TakeResponse::Unexpected { status, .. } => println!("server said {status}"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn take_task(&self, req: &TakeTaskRequest) -> Result<TakeResponse> {
        let url = self.url("/v2/tasks/take");
        let response = self.client.post(&url).json(req).send().await?;

        let status = response.status();
        let body = response.text().await?;
        interpret_take(status, body)
    }

    /// Report the result of a task
    pub async fn finish_task(&self, result: &TaskResult) -> Result<()> {
        let url = self.url("/v2/tasks/finish");
        let response = self.client.post(&url).json(result).send().await?;

        self.handle_empty_response(response).await
    }
}

fn interpret_take(status: StatusCode, body: String) -> Result<TakeResponse> {
    match status {
        StatusCode::OK if !body.trim().is_empty() => interpret_task(&body),
        StatusCode::NO_CONTENT => Ok(TakeResponse::NoTask),
        _ => Ok(TakeResponse::Unexpected {
            status: status.as_u16(),
            body,
        }),
    }
}

fn interpret_task(body: &str) -> Result<TakeResponse> {
    let document: Value = serde_json::from_str(body)
        .map_err(|e| ClientError::ParseError(format!("Failed to parse task: {}", e)))?;
    let Some(task_id) = Task::raw_id(&document).map(str::to_string) else {
        return Err(ClientError::ParseError(
            "Failed to parse task: no taskId".to_string(),
        ));
    };

    match serde_json::from_value(document) {
        Ok(task) => Ok(TakeResponse::Task(task)),
        Err(e) => Ok(TakeResponse::Rejected {
            task_id,
            message: format!("Invalid task document: {}", e),
        }),
    }
}
