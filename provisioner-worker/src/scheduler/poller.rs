//! Task poller
//!
//! One loop iteration takes at most one task:
//!
//! - no response from `take`, or an unexpected status: wait
//!   `error_delay` and try again (nothing was acquired, nothing is lost)
//! - no task available: stop in run-once mode, else wait `empty_poll_delay`
//! - a task: dispatch it and report its result exactly once inside an
//!   uninterruptible section, then stop in run-once mode or wait `task_delay`
//! - a task whose document cannot be read: report a failing result for its
//!   `taskId` the same way
//!
//! A failed report is logged and the task is considered consumed.

use std::sync::Arc;
use std::time::Duration;

use provisioner_client::TakeResponse;
use provisioner_core::domain::result::Correlation;
use provisioner_core::domain::task::Task;
use tracing::{debug, error, info, warn};

use crate::repository::TaskRepository;
use crate::service::{TaskDispatcher, execute_task, rejected_result};
use crate::shutdown::ShutdownSignal;

/// Identity attached to every reported result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_id: String,
    pub provisioner_id: String,
    pub tenant_id: String,
}

impl WorkerIdentity {
    pub fn correlation(&self, task: &Task) -> Correlation {
        self.correlation_for(&task.task_id)
    }

    pub fn correlation_for(&self, task_id: &str) -> Correlation {
        Correlation {
            worker_id: self.worker_id.clone(),
            task_id: task_id.to_string(),
            provisioner_id: self.provisioner_id.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

/// Delays between loop iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDelays {
    pub error: Duration,
    pub empty: Duration,
    pub task: Duration,
}

/// Takes tasks from the server and runs them one at a time
pub struct TaskPoller {
    repository: Arc<dyn TaskRepository>,
    dispatcher: Arc<dyn TaskDispatcher>,
    identity: WorkerIdentity,
    delays: PollDelays,
    once: bool,
    shutdown: ShutdownSignal,
}

/// What a single iteration observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Failed,
    Idle,
    Ran,
}

impl TaskPoller {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        dispatcher: Arc<dyn TaskDispatcher>,
        identity: WorkerIdentity,
        delays: PollDelays,
        once: bool,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            identity,
            delays,
            once,
            shutdown,
        }
    }

    /// Runs until shutdown is requested, or after one task (or one empty
    /// poll) in run-once mode. Returns the number of tasks run.
    pub async fn run(&self) -> usize {
        info!(
            worker_id = %self.identity.worker_id,
            once = self.once,
            "Starting task poller"
        );

        let mut completed = 0;
        while !self.shutdown.is_requested() {
            let delay = match self.poll_once().await {
                Step::Failed => self.delays.error,
                Step::Idle if self.once => break,
                Step::Idle => self.delays.empty,
                Step::Ran => {
                    completed += 1;
                    if self.once {
                        break;
                    }
                    self.delays.task
                }
            };

            if !self.shutdown.sleep(delay).await {
                break;
            }
        }

        info!(completed, "Task poller stopped");
        completed
    }

    async fn poll_once(&self) -> Step {
        let task = match self.repository.take().await {
            Ok(TakeResponse::Task(task)) => Arc::new(task),
            Ok(TakeResponse::Rejected { task_id, message }) => {
                let result = rejected_result(&message, self.identity.correlation_for(&task_id));
                let label = format!("task {}", task_id);
                self.shutdown
                    .uninterruptible(&label, async {
                        if let Err(e) = self.repository.finish(&result).await {
                            warn!("Result was not delivered: {:#}", e);
                        }
                    })
                    .await;
                return Step::Ran;
            }
            Ok(TakeResponse::NoTask) => {
                debug!("No task available");
                return Step::Idle;
            }
            Ok(TakeResponse::Unexpected { status, body }) => {
                error!(status, "Server returned an unexpected response to take: {}", body);
                return Step::Failed;
            }
            Err(e) => {
                error!("Unable to take a task: {:#}", e);
                return Step::Failed;
            }
        };

        let correlation = self.identity.correlation(&task);
        let label = format!("task {}", task.task_id);
        self.shutdown
            .uninterruptible(&label, async {
                let result = execute_task(self.dispatcher.as_ref(), task, correlation).await;
                if let Err(e) = self.repository.finish(&result).await {
                    warn!("Result was not delivered: {:#}", e);
                }
            })
            .await;

        Step::Ran
    }
}
