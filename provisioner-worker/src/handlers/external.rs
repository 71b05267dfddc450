//! Out-of-process handlers
//!
//! The type definition names an executable (relative paths resolve against
//! the plugin directory). For each operation the worker spawns it in the
//! invocation's working directory, writes one JSON request
//! `{operation, input, task, env}` to stdin and reads a JSON task output
//! from stdout, which is merged into the accumulator.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::domain::command::CommandExecutionError;
use provisioner_core::domain::result::TaskOutput;
use provisioner_core::domain::task::Task;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::plugin::error::PluginError;
use crate::plugin::registry::RegisteredType;
use crate::plugin::runtime::{
    Automator, AutomatorInput, CreateInput, PluginContext, PluginEnv, Provider, ProviderInput,
};

const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Serialize)]
struct Request<'a, I: Serialize> {
    operation: &'a str,
    input: &'a I,
    task: &'a Task,
    env: &'a PluginEnv,
}

/// Spawns the executable declared by a type definition
#[derive(Debug, Clone)]
struct ExternalHandler {
    classname: &'static str,
    executable: PathBuf,
    args: Vec<String>,
    timeout_secs: u64,
}

impl ExternalHandler {
    fn new(classname: &'static str, registered: &RegisteredType) -> Result<Self, PluginError> {
        let definition = &registered.definition;
        let executable = definition
            .field("executable")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                PluginError::InvalidInput(format!(
                    "{} type {} does not declare an executable",
                    registered.kind, registered.type_name
                ))
            })?;

        let args = match definition.field("args") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|a| a.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| PluginError::InvalidInput("args must be strings".to_string()))?,
            Some(_) => return Err(PluginError::InvalidInput("args must be an array".to_string())),
        };

        let timeout_secs = match definition.field("timeout_secs") {
            None => DEFAULT_TIMEOUT_SECS,
            Some(value) => value.as_u64().filter(|secs| *secs > 0).ok_or_else(|| {
                PluginError::InvalidInput("timeout_secs must be a positive integer".to_string())
            })?,
        };

        Ok(Self {
            classname,
            executable: registered.directory.join(executable),
            args,
            timeout_secs,
        })
    }

    async fn run<I: Serialize + Sync>(
        &self,
        ctx: &mut PluginContext,
        operation: &str,
        input: &I,
    ) -> Result<(), PluginError> {
        let request = Request {
            operation,
            input,
            task: ctx.task.as_ref(),
            env: &ctx.env,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| PluginError::Protocol(format!("cannot encode request: {}", e)))?;

        debug!(
            executable = %self.executable.display(),
            operation,
            work_dir = %ctx.work_dir.display(),
            "Spawning handler process"
        );

        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .current_dir(&ctx.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::Protocol("failed to capture stdin".to_string()))?;

        let write = async move {
            let result = stdin.write_all(&payload).await;
            drop(stdin);
            result
        };

        let exchange = async { tokio::join!(write, child.wait_with_output()) };
        let (written, output) =
            tokio::time::timeout(Duration::from_secs(self.timeout_secs), exchange)
                .await
                .map_err(|_| PluginError::Timeout {
                    classname: self.classname.to_string(),
                    timeout_secs: self.timeout_secs,
                })?;

        let output = output?;
        if let Err(e) = written {
            // The child may legitimately exit without reading its input
            debug!("Handler process did not consume its request: {}", e);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.is_empty() {
            debug!(stderr = %stderr, "Handler process stderr");
        }

        if !output.status.success() {
            return Err(CommandExecutionError::new(
                self.command_line(operation),
                stdout,
                stderr,
                output.status.code(),
                exit_signal(&output.status),
            )
            .into());
        }

        if stdout.trim().is_empty() {
            return Ok(());
        }
        let produced: TaskOutput = serde_json::from_str(stdout.trim())
            .map_err(|e| PluginError::Protocol(format!("invalid handler output: {}", e)))?;
        ctx.output.merge(produced);
        Ok(())
    }

    fn command_line(&self, operation: &str) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(self.args.iter().cloned());
        format!("{} ({})", parts.join(" "), operation)
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|s| s.to_string())
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

/// Provider backed by an external executable
#[derive(Debug, Clone)]
pub struct ExternalProvider {
    handler: ExternalHandler,
}

impl ExternalProvider {
    pub const CLASSNAME: &'static str = "ExternalProvider";

    pub fn new(registered: &RegisteredType) -> Result<Self, PluginError> {
        Ok(Self {
            handler: ExternalHandler::new(Self::CLASSNAME, registered)?,
        })
    }
}

#[async_trait]
impl Provider for ExternalProvider {
    fn classname(&self) -> &str {
        Self::CLASSNAME
    }

    async fn create(&self, ctx: &mut PluginContext, input: &CreateInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "create", input).await
    }

    async fn confirm(&self, ctx: &mut PluginContext, input: &ProviderInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "confirm", input).await
    }

    async fn delete(&self, ctx: &mut PluginContext, input: &ProviderInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "delete", input).await
    }
}

/// Automator backed by an external executable
#[derive(Debug, Clone)]
pub struct ExternalAutomator {
    handler: ExternalHandler,
}

impl ExternalAutomator {
    pub const CLASSNAME: &'static str = "ExternalAutomator";

    pub fn new(registered: &RegisteredType) -> Result<Self, PluginError> {
        Ok(Self {
            handler: ExternalHandler::new(Self::CLASSNAME, registered)?,
        })
    }
}

#[async_trait]
impl Automator for ExternalAutomator {
    fn classname(&self) -> &str {
        Self::CLASSNAME
    }

    async fn install(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "install", input).await
    }

    async fn configure(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "configure", input).await
    }

    async fn init(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "init", input).await
    }

    async fn start(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "start", input).await
    }

    async fn stop(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "stop", input).await
    }

    async fn remove(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "remove", input).await
    }

    async fn bootstrap(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.handler.run(ctx, "bootstrap", input).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use provisioner_core::domain::plugin::{PluginKind, TypeDefinition};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registered(dir: &Path, script: &str, timeout_secs: u64) -> RegisteredType {
        std::fs::write(dir.join("handler.sh"), script).unwrap();
        RegisteredType {
            kind: PluginKind::Provider,
            type_name: "fake".to_string(),
            plugin: "fake".to_string(),
            directory: dir.to_path_buf(),
            definition: TypeDefinition::new(ExternalProvider::CLASSNAME)
                .with_field("executable", "/bin/sh")
                .with_field("args", json!([dir.join("handler.sh").display().to_string()]))
                .with_field("timeout_secs", timeout_secs),
        }
    }

    fn context(work_dir: &Path) -> PluginContext {
        let task = serde_json::from_value(json!({
            "taskId": "t-7",
            "taskName": "create",
            "config": { "hostname": "node7", "flavor": "small" }
        }))
        .unwrap();
        PluginContext::new(
            Arc::new(task),
            PluginEnv {
                tenant_id: "acme".to_string(),
                provisioner_id: "p".to_string(),
                worker_id: "w".to_string(),
            },
            work_dir.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_output_is_merged_and_request_is_delivered() {
        let plugin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let script = "cat > request.json\necho '{\"status\":0,\"result\":{\"providerid\":\"i-77\"}}'\n";
        let provider = ExternalProvider::new(&registered(plugin_dir.path(), script, 30)).unwrap();

        let mut ctx = context(work_dir.path());
        let input = CreateInput::from_task(&ctx.task.clone());
        provider.create(&mut ctx, &input).await.unwrap();

        assert_eq!(ctx.output.get_result(&["providerid"]), Some(&json!("i-77")));

        let request: Value = serde_json::from_str(
            &std::fs::read_to_string(work_dir.path().join("request.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(request["operation"], "create");
        assert_eq!(request["input"]["hostname"], "node7");
        assert_eq!(request["task"]["taskId"], "t-7");
        assert_eq!(request["env"]["tenantId"], "acme");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_error() {
        let plugin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let script = "cat > /dev/null\necho partial\necho 'quota exceeded' >&2\nexit 3\n";
        let provider = ExternalProvider::new(&registered(plugin_dir.path(), script, 30)).unwrap();

        let mut ctx = context(work_dir.path());
        let input = ProviderInput::default();
        let err = provider.delete(&mut ctx, &input).await.unwrap_err();

        let command = err.command_error().unwrap();
        assert_eq!(command.exit_code, Some(3));
        assert_eq!(command.stdout, "partial\n");
        assert_eq!(command.stderr, "quota exceeded\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_handler() {
        let plugin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let provider =
            ExternalProvider::new(&registered(plugin_dir.path(), "sleep 30\n", 1)).unwrap();

        let mut ctx = context(work_dir.path());
        let err = provider
            .confirm(&mut ctx, &ProviderInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_garbage_output_is_protocol_error() {
        let plugin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let provider =
            ExternalProvider::new(&registered(plugin_dir.path(), "echo not-json\n", 30)).unwrap();

        let mut ctx = context(work_dir.path());
        let err = provider
            .confirm(&mut ctx, &ProviderInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Protocol(_)));
    }

    #[test]
    fn test_missing_executable_is_rejected() {
        let registered = RegisteredType {
            kind: PluginKind::Automator,
            type_name: "ext".to_string(),
            plugin: "ext".to_string(),
            directory: PathBuf::from("/opt/plugins/ext"),
            definition: TypeDefinition::new(ExternalAutomator::CLASSNAME),
        };
        assert!(matches!(
            ExternalAutomator::new(&registered),
            Err(PluginError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let with_timeout = |timeout: Value| RegisteredType {
            kind: PluginKind::Automator,
            type_name: "ext".to_string(),
            plugin: "ext".to_string(),
            directory: PathBuf::from("/opt/plugins/ext"),
            definition: TypeDefinition::new(ExternalAutomator::CLASSNAME)
                .with_field("executable", "run.sh")
                .with_field("timeout_secs", timeout),
        };

        assert!(matches!(
            ExternalAutomator::new(&with_timeout(json!(0))),
            Err(PluginError::InvalidInput(_))
        ));
        assert!(matches!(
            ExternalAutomator::new(&with_timeout(json!(-5))),
            Err(PluginError::InvalidInput(_))
        ));
        assert!(ExternalAutomator::new(&with_timeout(json!(30))).is_ok());
    }
}
