// Repository layer for database operations

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;
use crate::vault::Vault;
use sdmg_core::stores::{ConnectionCredentials, ConnectionStore, DefinitionStore};
use sdmg_core::{ApiDefinition, GatewayError};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Tenants
    // ============================================

    /// Insert the two well-known tenants if absent. Idempotent.
    pub async fn seed_tenants(&self) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, active)
            VALUES ($1, 'Platform', TRUE), ($2, 'Default', TRUE)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(PLATFORM_TENANT_ID)
        .bind(DEFAULT_TENANT_ID)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Option<TenantRow>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, active, created_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Activate or deactivate a tenant. The Platform tenant can never be
    /// deactivated; deactivation cascades to nothing here (rows stay, the
    /// auth join simply stops matching).
    pub async fn set_tenant_active(&self, id: Uuid, active: bool) -> Result<Option<TenantRow>> {
        if id == PLATFORM_TENANT_ID && !active {
            anyhow::bail!("The Platform tenant cannot be deactivated");
        }

        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            UPDATE tenants
            SET active = $2
            WHERE id = $1
            RETURNING id, name, active, created_at
            "#,
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Connections
    // ============================================

    pub async fn get_connection(
        &self,
        id: Uuid,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<SapConnectionRow>> {
        let row = sqlx::query_as::<_, SapConnectionRow>(
            r#"
            SELECT id, user_id, tenant_id, name, sap_base_url, token_url, client_id,
                   client_secret_enc, agent_api_url, agent_api_key_enc, active,
                   created_at, updated_at
            FROM sap_connections
            WHERE id = $1 AND user_id = $2 AND tenant_id = $3
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_connection_by_id(&self, id: Uuid) -> Result<Option<SapConnectionRow>> {
        let row = sqlx::query_as::<_, SapConnectionRow>(
            r#"
            SELECT id, user_id, tenant_id, name, sap_base_url, token_url, client_id,
                   client_secret_enc, agent_api_url, agent_api_key_enc, active,
                   created_at, updated_at
            FROM sap_connections
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // API tokens
    // ============================================

    pub async fn create_api_token(&self, input: CreateApiToken) -> Result<ApiTokenRow> {
        let row = sqlx::query_as::<_, ApiTokenRow>(
            r#"
            INSERT INTO api_tokens (user_id, tenant_id, connection_id, token_hash,
                                    token_prefix, label, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, tenant_id, connection_id, token_hash, token_prefix,
                      label, active, expires_at, last_used_at, request_count, created_at
            "#,
        )
        .bind(input.user_id)
        .bind(input.tenant_id)
        .bind(input.connection_id)
        .bind(&input.token_hash)
        .bind(&input.token_prefix)
        .bind(&input.label)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                anyhow::anyhow!("token hash already exists")
            }
            _ => anyhow::Error::from(e),
        })?;

        Ok(row)
    }

    /// The single-round-trip auth lookup: token, connection and tenant
    /// activity joined on the token hash.
    pub async fn find_token_for_auth(&self, token_hash: &str) -> Result<Option<TokenAuthRow>> {
        let row = sqlx::query_as::<_, TokenAuthRow>(
            r#"
            SELECT t.id AS token_id,
                   t.user_id AS token_user_id,
                   t.tenant_id AS token_tenant_id,
                   t.active AS token_active,
                   t.expires_at AS token_expires_at,
                   t.label AS token_label,
                   t.token_prefix AS token_prefix,
                   c.id AS connection_id,
                   c.user_id AS connection_user_id,
                   c.tenant_id AS connection_tenant_id,
                   c.name AS connection_name,
                   c.sap_base_url,
                   c.token_url,
                   c.client_id,
                   c.client_secret_enc,
                   c.agent_api_url,
                   c.agent_api_key_enc,
                   c.active AS connection_active,
                   tn.active AS tenant_active
            FROM api_tokens t
            JOIN sap_connections c ON t.connection_id = c.id
            JOIN tenants tn ON c.tenant_id = tn.id
            WHERE t.token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Usage bookkeeping after a successful authentication. Callers fire and
    /// forget; failures are theirs to swallow.
    pub async fn touch_token(&self, token_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE api_tokens
            SET last_used_at = NOW(), request_count = request_count + 1
            WHERE id = $1
            "#,
        )
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============================================
    // API definitions
    // ============================================

    const DEFINITION_COLUMNS: &'static str = r#"id, tenant_id, slug, name, method, path,
        query_params, request_headers, request_body, response_schema, provides,
        depends_on, response_fields, tags, active, version, created_at, updated_at"#;

    pub async fn get_definition_by_slug(
        &self,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<ApiDefinitionRow>> {
        let row = sqlx::query_as::<_, ApiDefinitionRow>(&format!(
            r#"
            SELECT {}
            FROM api_definitions
            WHERE tenant_id = $1 AND slug = $2
            "#,
            Self::DEFINITION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// One round-trip fetch of every active definition matching the slugs.
    pub async fn get_definitions_by_slugs(
        &self,
        tenant_id: Uuid,
        slugs: &[String],
    ) -> Result<Vec<ApiDefinitionRow>> {
        let rows = sqlx::query_as::<_, ApiDefinitionRow>(&format!(
            r#"
            SELECT {}
            FROM api_definitions
            WHERE tenant_id = $1 AND active = TRUE AND slug = ANY($2)
            "#,
            Self::DEFINITION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(slugs)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Filtered list: array-overlap on tags, case-insensitive partial match
    /// on name, slug or path.
    pub async fn list_definitions(
        &self,
        tenant_id: Uuid,
        filter: &DefinitionFilter,
    ) -> Result<Vec<ApiDefinitionRow>> {
        let pattern = filter.search.as_ref().map(|s| format!("%{}%", s));
        let rows = sqlx::query_as::<_, ApiDefinitionRow>(&format!(
            r#"
            SELECT {}
            FROM api_definitions
            WHERE tenant_id = $1
              AND ($2::text[] IS NULL OR tags && $2)
              AND ($3::text IS NULL OR name ILIKE $3 OR slug ILIKE $3 OR path ILIKE $3)
            ORDER BY slug
            "#,
            Self::DEFINITION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(&filter.tags)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Bulk-import insert: existing (tenant, slug) pairs are left untouched.
    /// Returns the inserted row, or None when the slug already existed.
    pub async fn insert_definition_skip_conflict(
        &self,
        input: CreateApiDefinition,
    ) -> Result<Option<ApiDefinitionRow>> {
        let row = sqlx::query_as::<_, ApiDefinitionRow>(&format!(
            r#"
            INSERT INTO api_definitions (tenant_id, slug, name, method, path, query_params,
                                         request_headers, request_body, response_schema,
                                         provides, depends_on, response_fields, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '{{}}', $10, $11, $12)
            ON CONFLICT (tenant_id, slug) DO NOTHING
            RETURNING {}
            "#,
            Self::DEFINITION_COLUMNS
        ))
        .bind(input.tenant_id)
        .bind(&input.slug)
        .bind(&input.name)
        .bind(&input.method)
        .bind(&input.path)
        .bind(serde_json::to_value(&input.query_params)?)
        .bind(&input.request_headers)
        .bind(&input.request_body)
        .bind(&input.response_schema)
        .bind(serde_json::to_value(&input.depends_on)?)
        .bind(serde_json::to_value(&input.response_fields)?)
        .bind(&input.tags)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Snapshot the current state of a definition into the version table and
    /// bump its version, atomically.
    pub async fn snapshot_definition_version(&self, definition_id: Uuid) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ApiDefinitionRow>(&format!(
            r#"
            SELECT {}
            FROM api_definitions
            WHERE id = $1
            FOR UPDATE
            "#,
            Self::DEFINITION_COLUMNS
        ))
        .bind(definition_id)
        .fetch_optional(&mut *tx)
        .await?
        .context("definition not found")?;

        let snapshot = serde_json::to_value(ApiDefinition::from(row.clone()))?;
        sqlx::query(
            r#"
            INSERT INTO api_definition_versions (api_definition_id, version, snapshot)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(definition_id)
        .bind(row.version)
        .bind(snapshot)
        .execute(&mut *tx)
        .await?;

        let next = row.version + 1;
        sqlx::query(
            r#"
            UPDATE api_definitions
            SET version = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(definition_id)
        .bind(next)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    // ============================================
    // Connection/API assignments
    // ============================================

    /// Idempotent assignment of a definition to a connection.
    pub async fn upsert_assignment(
        &self,
        connection_id: Uuid,
        api_definition_id: Uuid,
    ) -> Result<ConnectionApiAssignmentRow> {
        let row = sqlx::query_as::<_, ConnectionApiAssignmentRow>(
            r#"
            INSERT INTO connection_api_assignments (connection_id, api_definition_id)
            VALUES ($1, $2)
            ON CONFLICT (connection_id, api_definition_id)
                DO UPDATE SET connection_id = EXCLUDED.connection_id
            RETURNING id, connection_id, api_definition_id, created_at
            "#,
        )
        .bind(connection_id)
        .bind(api_definition_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_assignments(
        &self,
        connection_id: Uuid,
    ) -> Result<Vec<ConnectionApiAssignmentRow>> {
        let rows = sqlx::query_as::<_, ConnectionApiAssignmentRow>(
            r#"
            SELECT id, connection_id, api_definition_id, created_at
            FROM connection_api_assignments
            WHERE connection_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn delete_assignment(
        &self,
        connection_id: Uuid,
        api_definition_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM connection_api_assignments
            WHERE connection_id = $1 AND api_definition_id = $2
            "#,
        )
        .bind(connection_id)
        .bind(api_definition_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Request logs
    // ============================================

    pub async fn insert_request_log(&self, input: CreateRequestLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (token_id, connection_id, direction, target, method,
                                      path, request_headers, request_body_size, request_body,
                                      status_code, response_headers, response_size_bytes,
                                      duration_ms, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(input.token_id)
        .bind(input.connection_id)
        .bind(&input.direction)
        .bind(&input.target)
        .bind(&input.method)
        .bind(&input.path)
        .bind(&input.request_headers)
        .bind(input.request_body_size)
        .bind(&input.request_body)
        .bind(input.status_code)
        .bind(&input.response_headers)
        .bind(input.response_size_bytes)
        .bind(input.duration_ms)
        .bind(&input.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_request_logs(&self, filter: &RequestLogFilter) -> Result<Vec<RequestLogRow>> {
        let limit = if filter.limit <= 0 { 50 } else { filter.limit.min(500) };
        let rows = sqlx::query_as::<_, RequestLogRow>(
            r#"
            SELECT id, token_id, connection_id, direction, target, method, path,
                   request_headers, request_body_size, request_body, status_code,
                   response_headers, response_size_bytes, duration_ms, error_message,
                   created_at
            FROM request_logs
            WHERE ($1::uuid IS NULL OR token_id = $1)
              AND ($2::uuid IS NULL OR connection_id = $2)
              AND ($3::int IS NULL OR status_code = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
            ORDER BY id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(filter.token_id)
        .bind(filter.connection_id)
        .bind(filter.status_code)
        .bind(filter.since)
        .bind(filter.until)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn request_log_stats(&self, token_id: Option<Uuid>) -> Result<RequestLogStats> {
        let row = sqlx::query_as::<_, RequestLogStats>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE error_message IS NOT NULL
                                    OR status_code >= 500) AS errors,
                   AVG(duration_ms)::float8 AS avg_duration_ms
            FROM request_logs
            WHERE ($1::uuid IS NULL OR token_id = $1)
            "#,
        )
        .bind(token_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Retention sweep: drop log rows older than the given number of days.
    pub async fn prune_request_logs(&self, retention_days: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM request_logs
            WHERE created_at < NOW() - ($1 || ' days')::interval
            "#,
        )
        .bind(retention_days.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Use-case templates
    // ============================================

    pub async fn get_use_case_template(
        &self,
        tenant_id: Uuid,
        slug: &str,
    ) -> Result<Option<UseCaseTemplateRow>> {
        let row = sqlx::query_as::<_, UseCaseTemplateRow>(
            r#"
            SELECT id, tenant_id, slug, name, description, api_slugs, required_context,
                   active, created_at
            FROM use_case_templates
            WHERE tenant_id = $1 AND slug = $2 AND active = TRUE
            "#,
        )
        .bind(tenant_id)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}

/// Connection access for the engine: fetches rows and hands out decrypted
/// credentials. The only place where secrets leave the vault.
#[derive(Clone)]
pub struct ConnectionDirectory {
    db: Database,
    vault: Arc<Vault>,
}

impl ConnectionDirectory {
    pub fn new(db: Database, vault: Arc<Vault>) -> Self {
        Self { db, vault }
    }
}

#[async_trait]
impl ConnectionStore for ConnectionDirectory {
    async fn fetch_credentials(
        &self,
        connection_id: Uuid,
    ) -> sdmg_core::Result<Option<ConnectionCredentials>> {
        let Some(row) = self
            .db
            .get_connection_by_id(connection_id)
            .await
            .map_err(GatewayError::Internal)?
        else {
            return Ok(None);
        };

        let client_secret = self
            .vault
            .decrypt(&row.client_secret_enc)
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;
        let agent_api_key = row
            .agent_api_key_enc
            .as_deref()
            .map(|enc| self.vault.decrypt(enc))
            .transpose()
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;

        Ok(Some(ConnectionCredentials {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            sap_base_url: row.sap_base_url,
            token_url: row.token_url,
            client_id: row.client_id,
            client_secret,
            agent_api_url: row.agent_api_url,
            agent_api_key,
            active: row.active,
        }))
    }
}

#[async_trait]
impl DefinitionStore for Database {
    async fn fetch_by_slugs(
        &self,
        tenant_id: Uuid,
        slugs: &[String],
    ) -> sdmg_core::Result<Vec<ApiDefinition>> {
        let rows = self
            .get_definitions_by_slugs(tenant_id, slugs)
            .await
            .map_err(GatewayError::Internal)?;
        Ok(rows.into_iter().map(ApiDefinition::from).collect())
    }
}
