//! Control server HTTP client
//!
//! A small, typed async client for the endpoints a provisioning worker
//! talks to: taking tasks, reporting their results and registering the
//! plugin types it can serve.
//!
//! # Example
//!
//! ```no_run
//! use provisioner_client::{ServerClient, TakeResponse};
//! use provisioner_core::dto::task::TakeTaskRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ServerClient::new("http://localhost:55054");
//!
//!     let request = TakeTaskRequest {
//!         provisioner_id: "master".to_string(),
//!         worker_id: "host.1234".to_string(),
//!         tenant_id: "superadmin".to_string(),
//!     };
//!     if let TakeResponse::Task(task) = client.take_task(&request).await? {
//!         println!("Took task {}", task.task_id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod plugins;
mod tasks;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use plugins::AdminIdentity;
pub use tasks::TakeResponse;

use std::time::Duration;

use reqwest::Client;

/// HTTP client for the control server API
///
/// Endpoints are grouped into:
/// - Task lifecycle (take, finish)
/// - Plugin type registration
#[derive(Debug, Clone)]
pub struct ServerClient {
    /// Base URL of the server (e.g., "http://localhost:55054")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ServerClient {
    /// Create a new server client
    ///
    /// # Example
    /// ```
    /// use provisioner_client::ServerClient;
    ///
    /// let client = ServerClient::new("http://localhost:55054");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new server client whose requests give up after `timeout`
    ///
    /// # Example
    /// ```
    /// use provisioner_client::ServerClient;
    /// use std::time::Duration;
    ///
    /// let client = ServerClient::with_timeout("http://localhost:55054", Duration::from_secs(30))?;
    /// # Ok::<(), provisioner_client::ClientError>(())
    /// ```
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new server client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use provisioner_client::ServerClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = ServerClient::with_client("http://localhost:55054", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle a response whose body is ignored
    ///
    /// Any non-2xx status becomes an [`ClientError::ApiError`] carrying the
    /// response body.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
