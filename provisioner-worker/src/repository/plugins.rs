//! Plugins repository
//!
//! Registers provider and automator types with the control server.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use provisioner_client::{AdminIdentity, ServerClient};
use provisioner_core::domain::plugin::{PluginKind, TypeDefinition};

/// Repository trait for plugin type registration
#[async_trait]
pub trait PluginRepository: Send + Sync {
    /// Registers one type definition under `name`
    async fn register_type(
        &self,
        kind: PluginKind,
        name: &str,
        definition: &TypeDefinition,
    ) -> Result<()>;
}

/// HTTP implementation of PluginRepository
pub struct HttpPluginRepository {
    client: Arc<ServerClient>,
    identity: AdminIdentity,
}

impl HttpPluginRepository {
    pub fn new(client: Arc<ServerClient>, identity: AdminIdentity) -> Self {
        Self { client, identity }
    }
}

#[async_trait]
impl PluginRepository for HttpPluginRepository {
    async fn register_type(
        &self,
        kind: PluginKind,
        name: &str,
        definition: &TypeDefinition,
    ) -> Result<()> {
        self.client
            .register_plugin_type(kind, name, definition, &self.identity)
            .await
            .with_context(|| format!("Failed to register {} type {}", kind, name))
    }
}
