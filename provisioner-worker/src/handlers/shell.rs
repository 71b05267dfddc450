//! Shell automator
//!
//! Runs the commands of a service action on the node over SSH. The action's
//! `fields` carry either `commands` (array) or `command` (string). The
//! `bootstrap` operation records the node's RSA host key under
//! `result.ssh_host_keys.rsa` and runs the type's `bootstrap_commands`.
//!
//! When the task's provider fields carry a base64 `ssh_keyfile`, it is
//! written to `<work dir>/ssh_keys/<taskId>` for the duration of the
//! operation and used as the identity.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::plugin::error::PluginError;
use crate::plugin::registry::RegisteredType;
use crate::plugin::runtime::{Automator, AutomatorInput, PluginContext};
use crate::remote::{self, RemoteSession, SshAuth, SshSession, ssh_exec};

#[derive(Debug, Clone, Default)]
pub struct ShellAutomator {
    bootstrap_commands: Vec<String>,
}

impl ShellAutomator {
    pub const CLASSNAME: &'static str = "ShellAutomator";

    pub fn new(registered: &RegisteredType) -> Result<Self, PluginError> {
        let bootstrap_commands = match registered.definition.field("bootstrap_commands") {
            None => Vec::new(),
            Some(value) => string_list(value).ok_or_else(|| {
                PluginError::InvalidInput("bootstrap_commands must be a list of strings".to_string())
            })?,
        };
        Ok(Self { bootstrap_commands })
    }

    async fn run_action(
        &self,
        ctx: &mut PluginContext,
        input: &AutomatorInput,
        operation: &'static str,
    ) -> Result<(), PluginError> {
        let commands = action_commands(&input.fields).ok_or_else(|| {
            PluginError::InvalidInput(format!("no command configured for {}", operation))
        })?;
        let stdout = self.run_remote(ctx, input, operation, commands).await?;

        ctx.output.message = Some(format!("{} completed", operation));
        ctx.output.stdout = Some(stdout);
        Ok(())
    }

    /// Opens one session to the node and runs `commands` in order, stopping
    /// at the first failure. Returns the concatenated stdout.
    async fn run_remote(
        &self,
        ctx: &PluginContext,
        input: &AutomatorInput,
        operation: &'static str,
        commands: Vec<String>,
    ) -> Result<String, PluginError> {
        let host = target_host(input)?;
        let mut auth = SshAuth::from_map(&input.sshauth)?;

        let key_file = match provider_key(ctx) {
            Some(encoded) => {
                let dir = ctx.work_dir.join("ssh_keys");
                Some(remote::write_ssh_key_file(&dir, &ctx.task.task_id, encoded)?)
            }
            None => None,
        };
        if let Some(key_file) = &key_file {
            auth = auth.with_identity_file(key_file.path());
        }

        info!(host = %host, operation, commands = commands.len(), "Running shell commands");
        let result = tokio::task::spawn_blocking(move || {
            let mut session = SshSession::connect(&host, &auth)?;
            run_all(&mut session, operation, &commands)
        })
        .await
        .map_err(|e| PluginError::Other(anyhow::anyhow!("ssh worker thread failed: {}", e)));

        // Removes the key file whatever the outcome
        drop(key_file);
        Ok(result??)
    }
}

fn run_all(
    session: &mut dyn RemoteSession,
    operation: &str,
    commands: &[String],
) -> Result<String, remote::RemoteError> {
    let mut stdout = String::new();
    for (index, command) in commands.iter().enumerate() {
        let description = format!("{} command {} of {}", operation, index + 1, commands.len());
        let outcome = ssh_exec(session, command, Some(&description), false)?;
        stdout.push_str(&outcome.stdout);
    }
    Ok(stdout)
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn action_commands(fields: &Value) -> Option<Vec<String>> {
    if let Some(commands) = fields.get("commands") {
        return string_list(commands).filter(|c| !c.is_empty());
    }
    fields
        .get("command")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .map(|c| vec![c.to_string()])
}

fn target_host(input: &AutomatorInput) -> Result<String, PluginError> {
    input
        .ipaddress
        .clone()
        .or_else(|| input.hostname.clone())
        .ok_or_else(|| PluginError::InvalidInput("task has no ipaddress or hostname".to_string()))
}

fn provider_key(ctx: &PluginContext) -> Option<&str> {
    ctx.task
        .config
        .provider
        .as_ref()?
        .provisioner
        .get("ssh_keyfile")?
        .as_str()
}

#[async_trait]
impl Automator for ShellAutomator {
    fn classname(&self) -> &str {
        Self::CLASSNAME
    }

    async fn install(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.run_action(ctx, input, "install").await
    }

    async fn configure(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.run_action(ctx, input, "configure").await
    }

    async fn init(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.run_action(ctx, input, "init").await
    }

    async fn start(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.run_action(ctx, input, "start").await
    }

    async fn stop(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.run_action(ctx, input, "stop").await
    }

    async fn remove(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        self.run_action(ctx, input, "remove").await
    }

    async fn bootstrap(&self, ctx: &mut PluginContext, input: &AutomatorInput) -> Result<(), PluginError> {
        let host = target_host(input)?;
        let port = SshAuth::port_from_map(&input.sshauth)?;
        let key = remote::ssh_keyscan(&host, port, "rsa").await?;
        debug!(host = %host, "Scanned ssh host key");
        ctx.output.set_result(&["ssh_host_keys", "rsa"], key);

        if !self.bootstrap_commands.is_empty() {
            let stdout = self
                .run_remote(ctx, input, "bootstrap", self.bootstrap_commands.clone())
                .await?;
            ctx.output.stdout = Some(stdout);
        }
        ctx.output.message = Some("bootstrap completed".to_string());
        Ok(())
    }
}
