//! Task DTOs for worker/server communication

use serde::{Deserialize, Serialize};

/// Body of a `take` request: identifies the worker asking for work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeTaskRequest {
    pub provisioner_id: String,
    pub worker_id: String,
    pub tenant_id: String,
}
