// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sdmg_core::definition::{DependencySpec, QueryParam, ResponseField};
use sqlx::FromRow;
use uuid::Uuid;

/// Stable id of the seeded Platform tenant (cannot be deactivated).
pub const PLATFORM_TENANT_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001);
/// Stable id of the seeded Default tenant.
pub const DEFAULT_TENANT_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0002);

// ============================================
// Tenant models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Connection models
// ============================================

/// Configured upstream row. Secret columns hold vault envelopes, never
/// plaintext.
#[derive(Debug, Clone, FromRow)]
pub struct SapConnectionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub sap_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret_enc: String,
    pub agent_api_url: Option<String>,
    pub agent_api_key_enc: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// API token models
// ============================================

/// Gateway credential row. Only the SHA-256 hash of the plaintext is stored.
#[derive(Debug, Clone, FromRow)]
pub struct ApiTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub connection_id: Uuid,
    pub token_hash: String,
    pub token_prefix: String,
    pub label: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub request_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Flat row of the single-round-trip auth join: token, its connection and
/// the connection tenant's active flag.
#[derive(Debug, Clone, FromRow)]
pub struct TokenAuthRow {
    pub token_id: Uuid,
    pub token_user_id: Uuid,
    pub token_tenant_id: Uuid,
    pub token_active: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub token_label: String,
    pub token_prefix: String,
    pub connection_id: Uuid,
    pub connection_user_id: Uuid,
    pub connection_tenant_id: Uuid,
    pub connection_name: String,
    pub sap_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret_enc: String,
    pub agent_api_url: Option<String>,
    pub agent_api_key_enc: Option<String>,
    pub connection_active: bool,
    pub tenant_active: bool,
}

/// Input for creating an API token
#[derive(Debug, Clone)]
pub struct CreateApiToken {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub connection_id: Uuid,
    pub token_hash: String,
    pub token_prefix: String,
    pub label: String,
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================
// API definition models
// ============================================

/// Definition row. The JSONB columns are typed through sdmg-core's domain
/// structs; `#[sqlx(json)]` handles (de)serialization.
#[derive(Debug, Clone, FromRow)]
pub struct ApiDefinitionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub slug: String,
    pub name: String,
    pub method: String,
    pub path: String,
    #[sqlx(json)]
    pub query_params: Vec<QueryParam>,
    pub request_headers: Option<serde_json::Value>,
    pub request_body: Option<serde_json::Value>,
    pub response_schema: Option<serde_json::Value>,
    /// Deprecated leaf listing kept for imported definitions
    pub provides: Vec<String>,
    #[sqlx(json)]
    pub depends_on: Vec<DependencySpec>,
    #[sqlx(json)]
    pub response_fields: Vec<ResponseField>,
    pub tags: Vec<String>,
    pub active: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiDefinitionRow> for sdmg_core::ApiDefinition {
    fn from(row: ApiDefinitionRow) -> Self {
        sdmg_core::ApiDefinition {
            id: row.id,
            tenant_id: row.tenant_id,
            slug: row.slug,
            name: row.name,
            method: row.method,
            path: row.path,
            query_params: row.query_params,
            request_headers: row.request_headers,
            request_body: row.request_body,
            response_schema: row.response_schema,
            depends_on: row.depends_on,
            response_fields: row.response_fields,
            tags: row.tags,
            active: row.active,
        }
    }
}

/// Input for bulk definition import (insert, conflicts skipped)
#[derive(Debug, Clone)]
pub struct CreateApiDefinition {
    pub tenant_id: Uuid,
    pub slug: String,
    pub name: String,
    pub method: String,
    pub path: String,
    pub query_params: Vec<QueryParam>,
    pub request_headers: Option<serde_json::Value>,
    pub request_body: Option<serde_json::Value>,
    pub response_schema: Option<serde_json::Value>,
    pub depends_on: Vec<DependencySpec>,
    pub response_fields: Vec<ResponseField>,
    pub tags: Vec<String>,
}

/// Filter for the definition list query
#[derive(Debug, Clone, Default)]
pub struct DefinitionFilter {
    /// Any-overlap match against the tags array
    pub tags: Option<Vec<String>>,
    /// Case-insensitive partial match on name, slug or path
    pub search: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ApiDefinitionVersionRow {
    pub id: Uuid,
    pub api_definition_id: Uuid,
    pub version: i32,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Connection/API assignment models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ConnectionApiAssignmentRow {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub api_definition_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Request log models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct RequestLogRow {
    pub id: i64,
    pub token_id: Uuid,
    pub connection_id: Uuid,
    pub direction: String,
    pub target: String,
    pub method: String,
    pub path: String,
    pub request_headers: serde_json::Value,
    pub request_body_size: i64,
    pub request_body: Option<String>,
    pub status_code: Option<i32>,
    pub response_headers: Option<serde_json::Value>,
    pub response_size_bytes: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for the append-only request log insert
#[derive(Debug, Clone)]
pub struct CreateRequestLog {
    pub token_id: Uuid,
    pub connection_id: Uuid,
    pub direction: String,
    pub target: String,
    pub method: String,
    pub path: String,
    pub request_headers: serde_json::Value,
    pub request_body_size: i64,
    pub request_body: Option<String>,
    pub status_code: Option<i32>,
    pub response_headers: Option<serde_json::Value>,
    pub response_size_bytes: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

/// Filter for request log pagination
#[derive(Debug, Clone, Default)]
pub struct RequestLogFilter {
    pub token_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
    pub status_code: Option<i32>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Simple aggregates for the stats endpoint
#[derive(Debug, Clone, FromRow)]
pub struct RequestLogStats {
    pub total: i64,
    pub errors: i64,
    pub avg_duration_ms: Option<f64>,
}

// ============================================
// Use-case template models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UseCaseTemplateRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub api_slugs: Vec<String>,
    pub required_context: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
