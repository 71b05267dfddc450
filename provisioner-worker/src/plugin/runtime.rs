//! Handler contracts
//!
//! A provider type is served by a [`Provider`], an automator type by an
//! [`Automator`]. Every operation has a default body that fails with
//! [`PluginError::Unimplemented`], so a handler only overrides what it
//! supports and a missing operation surfaces as a task failure.
//!
//! Handlers write into [`PluginContext::output`]; the dispatcher returns
//! that accumulator once the operation succeeds.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::domain::result::TaskOutput;
use provisioner_core::domain::task::Task;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::plugin::error::PluginError;

/// Worker-level settings visible to every handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEnv {
    pub tenant_id: String,
    pub provisioner_id: String,
    pub worker_id: String,
}

/// State shared between the dispatcher and one handler invocation
#[derive(Debug)]
pub struct PluginContext {
    pub task: Arc<Task>,
    pub env: PluginEnv,
    /// Per-tenant, per-type directory created for this invocation
    pub work_dir: PathBuf,
    pub output: TaskOutput,
}

impl PluginContext {
    pub fn new(task: Arc<Task>, env: PluginEnv, work_dir: PathBuf) -> Self {
        Self {
            task,
            env,
            work_dir,
            output: TaskOutput::new(),
        }
    }
}

/// Arguments of a provider `create`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateInput {
    pub flavor: Option<String>,
    pub image: Option<String>,
    pub hostname: Option<String>,
    pub fields: Map<String, Value>,
}

impl CreateInput {
    pub fn from_task(task: &Task) -> Self {
        let config = &task.config;
        Self {
            flavor: config.flavor.clone(),
            image: config.image.clone(),
            hostname: config.hostname.clone(),
            fields: provider_fields(task),
        }
    }
}

/// Arguments of a provider `confirm` or `delete`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderInput {
    pub providerid: Option<String>,
    pub fields: Map<String, Value>,
}

impl ProviderInput {
    pub fn from_task(task: &Task) -> Self {
        Self {
            providerid: task.config.providerid.clone(),
            fields: provider_fields(task),
        }
    }
}

fn provider_fields(task: &Task) -> Map<String, Value> {
    task.config
        .provider
        .as_ref()
        .map(|p| p.provisioner.clone())
        .unwrap_or_default()
}

/// Arguments of every automator operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutomatorInput {
    pub sshauth: Map<String, Value>,
    pub hostname: Option<String>,
    pub ipaddress: Option<String>,
    pub fields: Value,
}

impl AutomatorInput {
    pub fn from_task(task: &Task) -> Self {
        let config = &task.config;
        Self {
            sshauth: config.ssh_auth.clone().unwrap_or_default(),
            hostname: config.hostname.clone(),
            ipaddress: config.access_ip().map(str::to_string),
            fields: config
                .service
                .as_ref()
                .and_then(|s| s.action.as_ref())
                .map(|a| a.fields.clone())
                .unwrap_or(Value::Null),
        }
    }
}

/// Infrastructure lifecycle handler
#[async_trait]
pub trait Provider: Send + Sync {
    /// Class name the handler was registered under
    fn classname(&self) -> &str;

    async fn create(&self, _ctx: &mut PluginContext, _input: &CreateInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "create"))
    }

    async fn confirm(&self, _ctx: &mut PluginContext, _input: &ProviderInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "confirm"))
    }

    async fn delete(&self, _ctx: &mut PluginContext, _input: &ProviderInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "delete"))
    }
}

/// Configuration management handler
#[async_trait]
pub trait Automator: Send + Sync {
    /// Class name the handler was registered under
    fn classname(&self) -> &str;

    async fn install(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "install"))
    }

    async fn configure(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "configure"))
    }

    async fn init(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "init"))
    }

    async fn start(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "start"))
    }

    async fn stop(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "stop"))
    }

    async fn remove(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "remove"))
    }

    async fn bootstrap(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
        Err(PluginError::unimplemented(self.classname(), "bootstrap"))
    }
}

/// The provider method a task name maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOperation {
    Create,
    Confirm,
    Delete,
}

/// The automator method a task name maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatorOperation {
    Install,
    Configure,
    Init,
    Start,
    Stop,
    Remove,
    Bootstrap,
}

impl ProviderOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Confirm => "confirm",
            Self::Delete => "delete",
        }
    }

    pub async fn invoke(
        self,
        handler: &dyn Provider,
        ctx: &mut PluginContext,
    ) -> Result<(), PluginError> {
        let task = Arc::clone(&ctx.task);
        match self {
            Self::Create => handler.create(ctx, &CreateInput::from_task(&task)).await,
            Self::Confirm => handler.confirm(ctx, &ProviderInput::from_task(&task)).await,
            Self::Delete => handler.delete(ctx, &ProviderInput::from_task(&task)).await,
        }
    }
}

impl AutomatorOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Configure => "configure",
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "remove",
            Self::Bootstrap => "bootstrap",
        }
    }

    pub async fn invoke(
        self,
        handler: &dyn Automator,
        ctx: &mut PluginContext,
    ) -> Result<(), PluginError> {
        let input = AutomatorInput::from_task(&ctx.task);
        match self {
            Self::Install => handler.install(ctx, &input).await,
            Self::Configure => handler.configure(ctx, &input).await,
            Self::Init => handler.init(ctx, &input).await,
            Self::Start => handler.start(ctx, &input).await,
            Self::Stop => handler.stop(ctx, &input).await,
            Self::Remove => handler.remove(ctx, &input).await,
            Self::Bootstrap => handler.bootstrap(ctx, &input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Bare;

    #[async_trait]
    impl Provider for Bare {
        fn classname(&self) -> &str {
            "Bare"
        }
    }

    #[async_trait]
    impl Automator for Bare {
        fn classname(&self) -> &str {
            "Bare"
        }
    }

    fn task(doc: Value) -> Arc<Task> {
        Arc::new(serde_json::from_value(doc).unwrap())
    }

    fn env() -> PluginEnv {
        PluginEnv {
            tenant_id: "acme".to_string(),
            provisioner_id: "p".to_string(),
            worker_id: "w".to_string(),
        }
    }

    #[test]
    fn test_inputs_are_taken_from_config() {
        let task = task(json!({
            "taskId": "t",
            "taskName": "create",
            "config": {
                "flavor": "m1.small",
                "image": "centos6",
                "hostname": "n1",
                "providerid": "i-1",
                "ipaddresses": { "access_v4": "10.1.1.1" },
                "ssh-auth": { "user": "root" },
                "provider": { "providertype": "aws", "provisioner": { "region": "eu" } },
                "service": { "action": { "type": "shell", "fields": { "command": "ls" } } }
            }
        }));

        let create = CreateInput::from_task(&task);
        assert_eq!(create.flavor.as_deref(), Some("m1.small"));
        assert_eq!(create.fields["region"], "eu");

        let confirm = ProviderInput::from_task(&task);
        assert_eq!(confirm.providerid.as_deref(), Some("i-1"));

        let automator = AutomatorInput::from_task(&task);
        assert_eq!(automator.ipaddress.as_deref(), Some("10.1.1.1"));
        assert_eq!(automator.sshauth["user"], "root");
        assert_eq!(automator.fields, json!({ "command": "ls" }));
    }

    #[tokio::test]
    async fn test_default_operations_are_unimplemented() {
        let task = task(json!({ "taskId": "t", "taskName": "confirm" }));
        let mut ctx = PluginContext::new(task, env(), PathBuf::from("/tmp"));

        let err = ProviderOperation::Confirm
            .invoke(&Bare, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Unimplemented { operation: "confirm", .. }));

        let err = AutomatorOperation::Init
            .invoke(&Bare, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Unimplemented { operation: "init", .. }));
    }
}
