//! Plugin registration endpoints

use crate::ServerClient;
use crate::error::{ClientError, Result};
use provisioner_core::domain::plugin::{PluginKind, TypeDefinition};
use reqwest::StatusCode;

const USER_HEADER: &str = "Coopr-UserID";
const TENANT_HEADER: &str = "Coopr-TenantID";

/// Administrative identity presented when registering plugin types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub user_id: String,
    pub tenant_id: String,
}

impl Default for AdminIdentity {
    fn default() -> Self {
        Self {
            user_id: "admin".to_string(),
            tenant_id: "superadmin".to_string(),
        }
    }
}

impl ServerClient {
    // =============================================================================
    // Plugin Registration
    // =============================================================================

    /// Register one provider or automator type with the server
    ///
    /// The type's manifest definition is sent verbatim. Only `200 OK` counts
    /// as success.
    pub async fn register_plugin_type(
        &self,
        kind: PluginKind,
        name: &str,
        definition: &TypeDefinition,
        identity: &AdminIdentity,
    ) -> Result<()> {
        let url = self.url(&format!("/v2/plugins/{}/{}", kind.collection(), name));
        tracing::debug!(%url, "Registering plugin type");

        let response = self
            .client
            .put(&url)
            .header(USER_HEADER, &identity.user_id)
            .header(TENANT_HEADER, &identity.tenant_id)
            .json(definition)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity() {
        let identity = AdminIdentity::default();
        assert_eq!(identity.user_id, "admin");
        assert_eq!(identity.tenant_id, "superadmin");
    }
}
