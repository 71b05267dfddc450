//! Task domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single unit of work handed to the worker by the control server.
///
/// Tasks are immutable once received. The worker reads the fields it needs
/// and keeps every other key so the document can be handed unchanged to
/// out-of-process plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub task_name: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub config: TaskConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Reads `taskId` from a raw task document, including one that does not
    /// deserialize into a [`Task`].
    pub fn raw_id(document: &Value) -> Option<&str> {
        document
            .get("taskId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Returns the parsed task name, or `None` when the name is not one the
    /// worker knows how to route.
    pub fn kind(&self) -> Option<TaskName> {
        TaskName::parse(&self.task_name)
    }

    /// Provider type named by `config.provider.providertype`
    pub fn provider_type(&self) -> Option<&str> {
        self.config
            .provider
            .as_ref()
            .and_then(|p| p.providertype.as_deref())
    }

    /// Automator type named by `config.service.action.type`
    pub fn automator_type(&self) -> Option<&str> {
        self.config
            .service
            .as_ref()
            .and_then(|s| s.action.as_ref())
            .and_then(|a| a.action_type.as_deref())
    }
}

/// Task configuration sub-document
///
/// Its shape depends on the task name; every field is optional and unknown
/// keys are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,
    /// Ordered automator types for a bootstrap task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipaddresses: Option<Map<String, Value>>,
    #[serde(rename = "ssh-auth", default, skip_serializing_if = "Option::is_none")]
    pub ssh_auth: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imagetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardwaretype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providerid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskConfig {
    /// The node's externally reachable IPv4 address (`ipaddresses.access_v4`)
    pub fn access_ip(&self) -> Option<&str> {
        self.ipaddresses
            .as_ref()
            .and_then(|ips| ips.get("access_v4"))
            .and_then(Value::as_str)
    }
}

/// Provider descriptor inside a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providertype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Provider-specific fields passed to the provider plugin
    #[serde(default)]
    pub provisioner: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Service descriptor inside a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ServiceAction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Service action: which automator type runs it and with what fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAction {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default)]
    pub fields: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Task names the worker routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    Create,
    Confirm,
    Delete,
    Install,
    Configure,
    Initialize,
    Start,
    Stop,
    Remove,
    Bootstrap,
}

impl TaskName {
    /// Parses a task name case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        let name = match name.to_ascii_lowercase().as_str() {
            "create" => Self::Create,
            "confirm" => Self::Confirm,
            "delete" => Self::Delete,
            "install" => Self::Install,
            "configure" => Self::Configure,
            "initialize" => Self::Initialize,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "remove" => Self::Remove,
            "bootstrap" => Self::Bootstrap,
            _ => return None,
        };
        Some(name)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Confirm => "confirm",
            Self::Delete => "delete",
            Self::Install => "install",
            Self::Configure => "configure",
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Bootstrap => "bootstrap",
        }
    }

    /// Whether the task is served by a provider plugin
    pub const fn is_provider_task(self) -> bool {
        matches!(self, Self::Create | Self::Confirm | Self::Delete)
    }
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
