//! Tasks repository
//!
//! Handles the two task endpoints the worker uses:
//! - Taking the next task for this worker
//! - Reporting a task's result

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use provisioner_client::{ServerClient, TakeResponse};
use provisioner_core::domain::result::TaskResult;
use provisioner_core::dto::task::TakeTaskRequest;

/// Repository trait for task operations with the control server
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Asks the server for the next task
    ///
    /// An `Err` means no response was obtained (or it could not be read);
    /// every HTTP status is reported through [`TakeResponse`].
    async fn take(&self) -> Result<TakeResponse>;

    /// Posts a task result to the server
    async fn finish(&self, result: &TaskResult) -> Result<()>;
}

/// HTTP implementation of TaskRepository
pub struct HttpTaskRepository {
    client: Arc<ServerClient>,
    request: TakeTaskRequest,
}

impl HttpTaskRepository {
    /// Creates a new HTTP task repository
    ///
    /// # Arguments
    /// * `client` - Shared server client
    /// * `request` - Identity sent with every `take`
    pub fn new(client: Arc<ServerClient>, request: TakeTaskRequest) -> Self {
        Self { client, request }
    }
}

#[async_trait]
impl TaskRepository for HttpTaskRepository {
    async fn take(&self) -> Result<TakeResponse> {
        self.client
            .take_task(&self.request)
            .await
            .context("Failed to take task")
    }

    async fn finish(&self, result: &TaskResult) -> Result<()> {
        self.client
            .finish_task(result)
            .await
            .with_context(|| format!("Failed to report result of task {}", result.correlation.task_id))
    }
}
