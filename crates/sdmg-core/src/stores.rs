// Store traits the engine depends on
// Decision: the engine never touches sqlx directly; the storage crate
// implements these traits and decrypts secrets before handing them over.

use async_trait::async_trait;
use uuid::Uuid;

use crate::definition::ApiDefinition;
use crate::error::Result;

/// A configured upstream with decrypted credentials.
///
/// Secrets only ever travel in this struct, handed out by the storage layer
/// for the duration of one token acquisition or proxy call. It is never
/// serialized and carries no `Debug`-visible secret material.
#[derive(Clone)]
pub struct ConnectionCredentials {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub sap_base_url: String,
    pub token_url: String,
    pub client_id: String,
    /// Decrypted OAuth2 client secret
    pub client_secret: String,
    pub agent_api_url: Option<String>,
    /// Decrypted agent API key
    pub agent_api_key: Option<String>,
    pub active: bool,
}

impl std::fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("sap_base_url", &self.sap_base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("agent_api_url", &self.agent_api_url)
            .field("agent_api_key", &self.agent_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("active", &self.active)
            .finish()
    }
}

/// Access to configured connections.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fetch a connection with its secrets decrypted. Returns `Ok(None)`
    /// when no such connection exists.
    async fn fetch_credentials(&self, connection_id: Uuid)
        -> Result<Option<ConnectionCredentials>>;
}

/// Access to API definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetch all active definitions matching the given slugs within a tenant
    /// in one round-trip. Slugs with no definition are simply absent from
    /// the result.
    async fn fetch_by_slugs(&self, tenant_id: Uuid, slugs: &[String])
        -> Result<Vec<ApiDefinition>>;
}
