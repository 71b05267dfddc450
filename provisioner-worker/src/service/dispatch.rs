//! Task dispatch
//!
//! Routes a task by name to a provider or automator operation:
//!
//! | task name | handler | type taken from |
//! |---|---|---|
//! | create, confirm, delete | provider | `config.provider.providertype` |
//! | install, configure, initialize, start, stop, remove | automator | `config.service.action.type` |
//! | bootstrap | each listed automator, in order | `config.automators` |
//!
//! Every invocation gets `<work root>/<tenant>/<collection>/<type>` as its
//! working directory, created on demand.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::domain::command::CommandExecutionError;
use provisioner_core::domain::plugin::PluginKind;
use provisioner_core::domain::result::TaskOutput;
use provisioner_core::domain::task::{Task, TaskName};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plugin::error::{PluginError, RegistryError};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::runtime::{AutomatorOperation, PluginContext, PluginEnv, ProviderOperation};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unhandled task type: {0}")]
    UnhandledTaskType(String),

    #[error("task has no {field}")]
    MissingField { field: &'static str },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("cannot create working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl DispatchError {
    /// The structured command failure behind this error, if any
    pub fn command_error(&self) -> Option<&CommandExecutionError> {
        match self {
            Self::Plugin(err) => err.command_error(),
            _ => None,
        }
    }
}

/// Service trait for running one task to completion
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Runs the handler operation(s) the task names and returns the
    /// accumulated output
    async fn dispatch(&self, task: Arc<Task>) -> Result<TaskOutput, DispatchError>;
}

enum Route {
    Provider(ProviderOperation),
    Automator(AutomatorOperation),
    Bootstrap,
}

fn route(name: TaskName) -> Route {
    match name {
        TaskName::Create => Route::Provider(ProviderOperation::Create),
        TaskName::Confirm => Route::Provider(ProviderOperation::Confirm),
        TaskName::Delete => Route::Provider(ProviderOperation::Delete),
        TaskName::Install => Route::Automator(AutomatorOperation::Install),
        TaskName::Configure => Route::Automator(AutomatorOperation::Configure),
        TaskName::Initialize => Route::Automator(AutomatorOperation::Init),
        TaskName::Start => Route::Automator(AutomatorOperation::Start),
        TaskName::Stop => Route::Automator(AutomatorOperation::Stop),
        TaskName::Remove => Route::Automator(AutomatorOperation::Remove),
        TaskName::Bootstrap => Route::Bootstrap,
    }
}

/// Dispatcher resolving handlers through the plugin registry
pub struct StandardDispatcher {
    registry: Arc<PluginRegistry>,
    env: PluginEnv,
    work_root: PathBuf,
}

impl StandardDispatcher {
    pub fn new(registry: Arc<PluginRegistry>, env: PluginEnv, work_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            env,
            work_root: work_root.into(),
        }
    }

    async fn context(
        &self,
        task: &Arc<Task>,
        kind: PluginKind,
        type_name: &str,
    ) -> Result<PluginContext, DispatchError> {
        let work_dir = self
            .work_root
            .join(&self.env.tenant_id)
            .join(kind.collection())
            .join(type_name);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|source| DispatchError::WorkDir {
                path: work_dir.clone(),
                source,
            })?;

        Ok(PluginContext::new(Arc::clone(task), self.env.clone(), work_dir))
    }

    async fn run_provider(
        &self,
        task: &Arc<Task>,
        operation: ProviderOperation,
    ) -> Result<TaskOutput, DispatchError> {
        let type_name = task.provider_type().ok_or(DispatchError::MissingField {
            field: "config.provider.providertype",
        })?;
        let registered = self.registry.resolve(PluginKind::Provider, type_name)?;
        let handler = self.registry.catalog().provider(registered)?;
        let mut ctx = self.context(task, PluginKind::Provider, type_name).await?;

        if operation == ProviderOperation::Create {
            let config = &task.config;
            info!(
                hostname = config.hostname.as_deref().unwrap_or_default(),
                provider = config
                    .provider
                    .as_ref()
                    .and_then(|p| p.description.as_deref())
                    .unwrap_or(type_name),
                cluster = %task.cluster_id,
                imagetype = config.imagetype.as_deref().unwrap_or_default(),
                hardwaretype = config.hardwaretype.as_deref().unwrap_or_default(),
                "Creating node"
            );
        }

        debug!(type_name, operation = operation.as_str(), "Invoking provider");
        operation.invoke(handler.as_ref(), &mut ctx).await?;

        if operation == ProviderOperation::Delete && ctx.output.status != 0 {
            warn!(
                cluster = %task.cluster_id,
                hostname = task.config.hostname.as_deref().unwrap_or_default(),
                "Node could not be deleted: {}",
                ctx.output.message.as_deref().unwrap_or_default()
            );
        }
        Ok(ctx.output)
    }

    async fn run_automator(
        &self,
        task: &Arc<Task>,
        type_name: &str,
        operation: AutomatorOperation,
    ) -> Result<TaskOutput, DispatchError> {
        let registered = self.registry.resolve(PluginKind::Automator, type_name)?;
        let handler = self.registry.catalog().automator(registered)?;
        let mut ctx = self.context(task, PluginKind::Automator, type_name).await?;

        debug!(type_name, operation = operation.as_str(), "Invoking automator");
        operation.invoke(handler.as_ref(), &mut ctx).await?;
        Ok(ctx.output)
    }

    /// Runs each listed automator's `bootstrap` in order, deep-merging their
    /// outputs. The first failure aborts the task and discards the merge.
    async fn run_bootstrap(&self, task: &Arc<Task>) -> Result<TaskOutput, DispatchError> {
        let automators = task.config.automators.as_deref().unwrap_or_default();
        if automators.is_empty() {
            warn!("Bootstrap task lists no automators, nothing to do");
            return Ok(TaskOutput::new());
        }

        debug!(?automators, "Running bootstrap automators");
        let mut combined = TaskOutput::new();
        for type_name in automators {
            let output = self
                .run_automator(task, type_name, AutomatorOperation::Bootstrap)
                .await?;
            combined.merge(output);
        }
        Ok(combined)
    }
}

#[async_trait]
impl TaskDispatcher for StandardDispatcher {
    async fn dispatch(&self, task: Arc<Task>) -> Result<TaskOutput, DispatchError> {
        let Some(name) = task.kind() else {
            return Err(DispatchError::UnhandledTaskType(task.task_name.clone()));
        };
        debug!("Processing task {}", task.task_id);

        match route(name) {
            Route::Provider(operation) => self.run_provider(&task, operation).await,
            Route::Automator(operation) => {
                let type_name = task.automator_type().ok_or(DispatchError::MissingField {
                    field: "config.service.action.type",
                })?;
                self.run_automator(&task, type_name, operation).await
            }
            Route::Bootstrap => self.run_bootstrap(&task).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::catalog::HandlerCatalog;
    use crate::plugin::registry::RegisteredType;
    use crate::plugin::runtime::{Automator, AutomatorInput, CreateInput, Provider, ProviderInput};
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Calls = Arc<Mutex<Vec<String>>>;

    struct FakeProvider {
        calls: Calls,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn classname(&self) -> &str {
            "FakeProvider"
        }

        async fn create(&self, ctx: &mut PluginContext, input: &CreateInput) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push("create".to_string());
            ctx.output.set_result(&["providerid"], format!("id-{}", input.hostname.as_deref().unwrap_or("")));
            ctx.output.set_result(&["work_dir"], ctx.work_dir.display().to_string());
            Ok(())
        }

        async fn delete(&self, ctx: &mut PluginContext, _input: &ProviderInput) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push("delete".to_string());
            ctx.output.status = 1;
            ctx.output.message = Some("instance busy".to_string());
            Ok(())
        }
    }

    /// Writes `{<type>: true, shared: <type>}` on bootstrap, fails on demand
    struct FakeAutomator {
        type_name: String,
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl Automator for FakeAutomator {
        fn classname(&self) -> &str {
            "FakeAutomator"
        }

        async fn install(&self, _ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push(format!("install:{}", self.type_name));
            Ok(())
        }

        async fn bootstrap(&self, ctx: &mut PluginContext, _input: &AutomatorInput) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push(format!("bootstrap:{}", self.type_name));
            if self.fail {
                return Err(PluginError::InvalidInput(format!("{} failed", self.type_name)));
            }
            ctx.output.set_result(&[self.type_name.as_str()], true);
            ctx.output.set_result(&["shared"], self.type_name.clone());
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: StandardDispatcher,
        calls: Calls,
        work_root: TempDir,
    }

    fn fixture() -> Fixture {
        let calls: Calls = Arc::default();
        let mut catalog = HandlerCatalog::new();
        let provider_calls = Arc::clone(&calls);
        catalog.register_provider("FakeProvider", move |_| {
            Ok(Box::new(FakeProvider {
                calls: Arc::clone(&provider_calls),
            }))
        });
        let automator_calls = Arc::clone(&calls);
        catalog.register_automator("FakeAutomator", move |registered: &RegisteredType| {
            Ok(Box::new(FakeAutomator {
                type_name: registered.type_name.clone(),
                calls: Arc::clone(&automator_calls),
                fail: registered.definition.field("fail").is_some(),
            }))
        });

        let plugins = TempDir::new().unwrap();
        let manifest = json!({
            "name": "fakes",
            "providertypes": ["cloud"],
            "automatortypes": ["a", "b", "broken"],
            "cloud": { "classname": "FakeProvider" },
            "a": { "classname": "FakeAutomator" },
            "b": { "classname": "FakeAutomator" },
            "broken": { "classname": "FakeAutomator", "fail": true }
        });
        std::fs::create_dir_all(plugins.path().join("fakes")).unwrap();
        std::fs::write(plugins.path().join("fakes/fakes.json"), manifest.to_string()).unwrap();

        let registry = PluginRegistry::scan(plugins.path(), catalog);
        assert!(registry.load_errors().is_empty());

        let work_root = TempDir::new().unwrap();
        let env = PluginEnv {
            tenant_id: "acme".to_string(),
            provisioner_id: "p".to_string(),
            worker_id: "w".to_string(),
        };
        Fixture {
            dispatcher: StandardDispatcher::new(Arc::new(registry), env, work_root.path()),
            calls,
            work_root,
        }
    }

    fn task(doc: serde_json::Value) -> Arc<Task> {
        Arc::new(serde_json::from_value(doc).unwrap())
    }

    #[tokio::test]
    async fn test_create_invokes_only_provider_create() {
        let f = fixture();
        let output = f
            .dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "CREATE",
                "clusterId": "c1",
                "config": { "hostname": "n1", "provider": { "providertype": "cloud" } }
            })))
            .await
            .unwrap();

        assert_eq!(*f.calls.lock().unwrap(), vec!["create".to_string()]);
        assert_eq!(output.get_result(&["providerid"]), Some(&json!("id-n1")));

        let expected = f.work_root.path().join("acme/providertypes/cloud");
        assert!(expected.is_dir());
        assert_eq!(
            output.get_result(&["work_dir"]),
            Some(&json!(expected.display().to_string()))
        );
    }

    #[tokio::test]
    async fn test_delete_with_failing_status_is_returned() {
        let f = fixture();
        let output = f
            .dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "delete",
                "config": { "providerid": "i-1", "provider": { "providertype": "cloud" } }
            })))
            .await
            .unwrap();
        assert_eq!(output.status, 1);
        assert_eq!(output.message.as_deref(), Some("instance busy"));
    }

    #[tokio::test]
    async fn test_unimplemented_provider_operation_fails() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "confirm",
                "config": { "provider": { "providertype": "cloud" } }
            })))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Plugin(PluginError::Unimplemented { operation: "confirm", .. })
        ));
    }

    #[tokio::test]
    async fn test_automator_task_uses_service_action_type() {
        let f = fixture();
        f.dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "install",
                "config": { "service": { "action": { "type": "b" } } }
            })))
            .await
            .unwrap();
        assert_eq!(*f.calls.lock().unwrap(), vec!["install:b".to_string()]);
        assert!(f.work_root.path().join("acme/automatortypes/b").is_dir());
    }

    #[tokio::test]
    async fn test_bootstrap_runs_in_order_and_later_wins() {
        let f = fixture();
        let output = f
            .dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "bootstrap",
                "config": { "automators": ["a", "b"] }
            })))
            .await
            .unwrap();

        assert_eq!(
            *f.calls.lock().unwrap(),
            vec!["bootstrap:a".to_string(), "bootstrap:b".to_string()]
        );
        assert_eq!(
            serde_json::Value::Object(output.result),
            json!({ "a": true, "b": true, "shared": "b" })
        );
    }

    #[tokio::test]
    async fn test_bootstrap_without_automators_is_empty_success() {
        let f = fixture();
        for config in [json!({}), json!({ "automators": [] })] {
            let output = f
                .dispatcher
                .dispatch(task(json!({ "taskId": "t", "taskName": "bootstrap", "config": config })))
                .await
                .unwrap();
            assert_eq!(output, TaskOutput::new());
        }
        assert!(f.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_aborts_on_first_failure() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "bootstrap",
                "config": { "automators": ["a", "broken", "b"] }
            })))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Plugin(PluginError::InvalidInput(_))));
        assert_eq!(
            *f.calls.lock().unwrap(),
            vec!["bootstrap:a".to_string(), "bootstrap:broken".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unregistered_provider_type() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch(task(json!({
                "taskId": "t1",
                "taskName": "create",
                "config": { "provider": { "providertype": "joyent" } }
            })))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Registry(RegistryError::UnregisteredType { .. })
        ));
        assert!(f.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_name_is_unhandled() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch(task(json!({ "taskId": "t1", "taskName": "reboot" })))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnhandledTaskType(name) if name == "reboot"));
    }

    #[tokio::test]
    async fn test_missing_type_field() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch(task(json!({ "taskId": "t1", "taskName": "start", "config": {} })))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingField { .. }));
    }
}
