//! Worker configuration
//!
//! Command line flags (each with a `PROVISIONER_*` environment fallback) are
//! parsed by [`Cli`] and resolved into a [`Config`] holding everything the
//! rest of the worker needs, including the loop's fixed retry delays.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use provisioner_client::AdminIdentity;

/// Default log directive when neither `RUST_LOG` nor `--log-level` is given
pub const DEFAULT_LOG_DIRECTIVE: &str = "provisioner_worker=info,provisioner_client=info";

#[derive(Debug, Parser)]
#[command(name = "provisioner-worker")]
#[command(about = "Provisioning worker: takes tasks from the server and runs them through plugins", long_about = None)]
pub struct Cli {
    /// Control server URL
    #[arg(
        long,
        env = "PROVISIONER_SERVER_URI",
        default_value = "http://localhost:55054"
    )]
    pub server_uri: String,

    /// Tenant this worker takes tasks for
    #[arg(long, env = "PROVISIONER_TENANT", default_value = "superadmin")]
    pub tenant: String,

    /// Identifier of the provisioner this worker belongs to
    #[arg(long, env = "PROVISIONER_ID", default_value = "master")]
    pub provisioner: String,

    /// Process name attached to every log line
    #[arg(long, env = "PROVISIONER_WORKER_NAME")]
    pub name: Option<String>,

    /// Root directory scanned for plugin manifests
    #[arg(long, env = "PROVISIONER_PLUGIN_DIR", default_value = "plugins")]
    pub plugin_dir: PathBuf,

    /// Root of the per-tenant plugin working directories
    #[arg(long, env = "PROVISIONER_WORK_DIR", default_value = "work")]
    pub work_dir: PathBuf,

    /// User presented when registering plugin types
    #[arg(long, env = "PROVISIONER_ADMIN_USER", default_value = "admin")]
    pub admin_user: String,

    /// Tenant presented when registering plugin types
    #[arg(long, env = "PROVISIONER_ADMIN_TENANT", default_value = "superadmin")]
    pub admin_tenant: String,

    /// Register the loaded plugin types with the server and exit
    #[arg(long, conflicts_with = "file")]
    pub register: bool,

    /// Run a single task read from a JSON file, without talking to the server
    #[arg(long, env = "PROVISIONER_TASK_FILE")]
    pub file: Option<PathBuf>,

    /// Stop after the first task (or the first empty poll)
    #[arg(long, env = "PROVISIONER_ONCE")]
    pub once: bool,

    /// Log filter directive used when RUST_LOG is unset (e.g. "debug")
    #[arg(long, env = "PROVISIONER_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// What the process does after loading plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Register,
    File(PathBuf),
    Poll { once: bool },
}

/// Resolved worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_uri: String,
    pub tenant: String,
    pub provisioner_id: String,
    pub name: Option<String>,
    pub plugin_dir: PathBuf,
    pub work_dir: PathBuf,
    pub admin: AdminIdentity,
    pub mode: RunMode,

    /// Delay after a failed or unexpected `take`
    pub error_delay: Duration,

    /// Delay after a `take` that returned no task
    pub empty_poll_delay: Duration,

    /// Delay between two tasks
    pub task_delay: Duration,

    /// Per-request timeout for calls to the server
    pub http_timeout: Duration,
}

impl Config {
    pub fn new(server_uri: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            tenant: tenant.into(),
            provisioner_id: "master".to_string(),
            name: None,
            plugin_dir: PathBuf::from("plugins"),
            work_dir: PathBuf::from("work"),
            admin: AdminIdentity::default(),
            mode: RunMode::Poll { once: false },
            error_delay: Duration::from_secs(10),
            empty_poll_delay: Duration::from_secs(1),
            task_delay: Duration::from_secs(5),
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tenant.trim().is_empty() {
            anyhow::bail!("tenant cannot be empty");
        }

        if self.provisioner_id.trim().is_empty() {
            anyhow::bail!("provisioner id cannot be empty");
        }

        if self.http_timeout.is_zero() {
            anyhow::bail!("http timeout must be positive");
        }

        // File mode never talks to the server
        if !matches!(self.mode, RunMode::File(_)) {
            validate_server_uri(&self.server_uri)?;
        }

        Ok(())
    }
}

fn validate_server_uri(uri: &str) -> anyhow::Result<()> {
    if !uri.starts_with("http://") && !uri.starts_with("https://") {
        anyhow::bail!("server uri must start with http:// or https://");
    }
    Ok(())
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let mode = match (cli.register, cli.file) {
            (true, _) => RunMode::Register,
            (false, Some(path)) => RunMode::File(path),
            (false, None) => RunMode::Poll { once: cli.once },
        };

        Self {
            provisioner_id: cli.provisioner,
            name: cli.name,
            plugin_dir: cli.plugin_dir,
            work_dir: cli.work_dir,
            admin: AdminIdentity {
                user_id: cli.admin_user,
                tenant_id: cli.admin_tenant,
            },
            mode,
            ..Self::new(cli.server_uri, cli.tenant)
        }
    }
}

/// Identity used to correlate this process's results: `<host>.<pid>`
pub fn worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_lowercase())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}.{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["provisioner-worker"];
        argv.extend_from_slice(args);
        Config::from(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_default_config() {
        let config = Config::new("http://localhost:55054", "superadmin");
        assert_eq!(config.error_delay, Duration::from_secs(10));
        assert_eq!(config.empty_poll_delay, Duration::from_secs(1));
        assert_eq!(config.task_delay, Duration::from_secs(5));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.admin, AdminIdentity::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new("http://localhost:55054", "acme");
        assert!(config.validate().is_ok());

        config.tenant = String::new();
        assert!(config.validate().is_err());
        config.tenant = "acme".to_string();

        config.http_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.http_timeout = Duration::from_secs(30);

        config.server_uri = "localhost:55054".to_string();
        assert!(config.validate().is_err());

        config.mode = RunMode::File(PathBuf::from("task.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_run_mode_from_flags() {
        assert_eq!(parse(&[]).mode, RunMode::Poll { once: false });
        assert_eq!(parse(&["--once"]).mode, RunMode::Poll { once: true });
        assert_eq!(parse(&["--register"]).mode, RunMode::Register);
        assert_eq!(
            parse(&["--file", "/tmp/task.json"]).mode,
            RunMode::File(PathBuf::from("/tmp/task.json"))
        );
    }

    #[test]
    fn test_register_conflicts_with_file() {
        let result = Cli::try_parse_from(["provisioner-worker", "--register", "--file", "t.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_admin_identity_from_flags() {
        let config = parse(&["--admin-user", "ops", "--admin-tenant", "root"]);
        assert_eq!(config.admin.user_id, "ops");
        assert_eq!(config.admin.tenant_id, "root");
    }

    #[test]
    fn test_worker_id_ends_with_pid() {
        let id = worker_id();
        assert!(id.ends_with(&format!(".{}", std::process::id())));
    }
}
