//! Provisioning Worker
//!
//! A stateless worker that takes provisioning tasks from the control server,
//! runs them through provider and automator plugins, and reports the result.
//!
//! Architecture:
//! - Configuration: command line flags with environment fallbacks
//! - Plugins: manifest registry plus the built-in handler catalog
//! - Repositories: HTTP communication with the server (tasks, plugin types)
//! - Services: task dispatch and result building
//! - Scheduler: task polling with deferred shutdown
//!
//! Besides polling, the worker can register its plugin types with the server
//! (`--register`) or run a single task from a file (`--file`).

mod config;
mod handlers;
mod plugin;
mod remote;
mod repository;
mod scheduler;
mod service;
mod shutdown;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use provisioner_client::ServerClient;
use provisioner_core::domain::plugin::PluginKind;
use provisioner_core::dto::task::TakeTaskRequest;
use tracing::{Instrument, debug, info, info_span, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, Config, DEFAULT_LOG_DIRECTIVE, RunMode};
use crate::plugin::{HandlerCatalog, PluginEnv, PluginRegistry};
use crate::repository::{HttpPluginRepository, HttpTaskRepository};
use crate::scheduler::{PollDelays, TaskPoller, WorkerIdentity};
use crate::service::modes::{register_types, run_task_file};
use crate::service::{StandardDispatcher, TaskDispatcher};
use crate::shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let default_directive = cli
        .log_level
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_DIRECTIVE.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from(cli);
    config.validate()?;

    let worker_id = config::worker_id();
    let name = config.name.clone().unwrap_or_else(|| "worker".to_string());
    let span = info_span!("worker", worker_name = %name, worker_id = %worker_id);

    run(config, worker_id).instrument(span).await
}

async fn run(config: Config, worker_id: String) -> Result<ExitCode> {
    info!("Starting provisioning worker");
    info!(
        "Loaded configuration: tenant={}, provisioner={}, server_uri={}",
        config.tenant, config.provisioner_id, config.server_uri
    );

    let registry = PluginRegistry::scan(&config.plugin_dir, HandlerCatalog::builtin());
    for kind in [PluginKind::Provider, PluginKind::Automator] {
        let names = registry.type_names(kind);
        info!("Loaded {} {} type(s): {}", names.len(), kind, names.join(", "));
    }

    match config.mode.clone() {
        RunMode::Register => register(&config, &registry).await,
        RunMode::File(path) => run_file(&config, registry, worker_id, &path).await,
        RunMode::Poll { once } => poll(&config, registry, worker_id, once).await,
    }
}

/// Registers every loaded plugin type with the server
async fn register(config: &Config, registry: &PluginRegistry) -> Result<ExitCode> {
    let repository = HttpPluginRepository::new(server_client(config)?, config.admin.clone());

    info!("Registering plugin types as {}", config.admin.user_id);
    let summary = register_types(registry, &repository).await;
    Ok(summary.exit_code())
}

/// Runs one task read from a file and prints its result
async fn run_file(
    config: &Config,
    registry: PluginRegistry,
    worker_id: String,
    path: &Path,
) -> Result<ExitCode> {
    let identity = worker_identity(config, worker_id);
    let dispatcher = build_dispatcher(config, registry, &identity);

    let shutdown = ShutdownSignal::new();
    shutdown.listen();
    let result = shutdown
        .uninterruptible("task file", run_task_file(path, &dispatcher, &identity))
        .await;

    let json = serde_json::to_string_pretty(&result).context("Failed to serialize task result")?;
    info!(status = result.output.status, "Task file processed");
    debug!("Task result: {}", json);
    println!("{}", json);

    Ok(ExitCode::SUCCESS)
}

/// Polls the server until shutdown (or once)
async fn poll(
    config: &Config,
    registry: PluginRegistry,
    worker_id: String,
    once: bool,
) -> Result<ExitCode> {
    for kind in [PluginKind::Provider, PluginKind::Automator] {
        if registry.type_names(kind).is_empty() {
            warn!("No {} types loaded, tasks needing one will fail", kind);
        }
    }

    let shutdown = ShutdownSignal::new();
    shutdown.listen();

    let identity = worker_identity(config, worker_id);
    let repository = HttpTaskRepository::new(
        server_client(config)?,
        TakeTaskRequest {
            provisioner_id: identity.provisioner_id.clone(),
            worker_id: identity.worker_id.clone(),
            tenant_id: identity.tenant_id.clone(),
        },
    );
    let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(build_dispatcher(config, registry, &identity));

    info!(
        "Poll delays: error={:?}, empty={:?}, task={:?}",
        config.error_delay, config.empty_poll_delay, config.task_delay
    );

    let poller = TaskPoller::new(
        Arc::new(repository),
        dispatcher,
        identity,
        PollDelays {
            error: config.error_delay,
            empty: config.empty_poll_delay,
            task: config.task_delay,
        },
        once,
        shutdown,
    );
    poller.run().await;

    info!("Worker stopped");
    Ok(ExitCode::SUCCESS)
}

fn server_client(config: &Config) -> Result<Arc<ServerClient>> {
    let client = ServerClient::with_timeout(config.server_uri.clone(), config.http_timeout)
        .context("Failed to build HTTP client")?;
    Ok(Arc::new(client))
}

fn worker_identity(config: &Config, worker_id: String) -> WorkerIdentity {
    WorkerIdentity {
        worker_id,
        provisioner_id: config.provisioner_id.clone(),
        tenant_id: config.tenant.clone(),
    }
}

fn build_dispatcher(
    config: &Config,
    registry: PluginRegistry,
    identity: &WorkerIdentity,
) -> StandardDispatcher {
    let env = PluginEnv {
        tenant_id: identity.tenant_id.clone(),
        provisioner_id: identity.provisioner_id.clone(),
        worker_id: identity.worker_id.clone(),
    };
    StandardDispatcher::new(Arc::new(registry), env, config.work_dir.clone())
}
