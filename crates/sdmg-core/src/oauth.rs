// Per-connection OAuth2 client-credentials token cache
//
// One fresh bearer per upstream connection, refreshed 120s before expiry and
// invalidated when the upstream answers 401. Concurrent acquisitions for the
// same connection coalesce behind a per-connection async mutex so only one
// POST to the token endpoint is ever in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::stores::ConnectionStore;

/// Refresh when less than this much lifetime remains.
const REFRESH_SKEW_MS: i64 = 120_000;
/// Fallback token lifetime when the endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Deadline for the token endpoint POST.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at_ms: i64,
}

impl CachedToken {
    fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms + REFRESH_SKEW_MS < self.expires_at_ms
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedToken>>>;

/// In-process token cache keyed by connection id.
pub struct TokenCache {
    connections: Arc<dyn ConnectionStore>,
    client: reqwest::Client,
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl TokenCache {
    pub fn new(connections: Arc<dyn ConnectionStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ACQUIRE_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            connections,
            client,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, connection_id: Uuid) -> Slot {
        let mut slots = self.slots.lock().expect("token cache lock poisoned");
        slots.entry(connection_id).or_default().clone()
    }

    /// Return a bearer for the connection, acquiring one when the cache is
    /// empty or inside the refresh window. Concurrent callers for the same
    /// connection await the single in-flight acquisition.
    pub async fn get_token(&self, connection_id: Uuid) -> Result<String> {
        let slot = self.slot(connection_id);
        let mut guard = slot.lock().await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Some(cached) = guard.as_ref() {
            if cached.is_fresh(now_ms) {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.acquire(connection_id).await?;
        let token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    /// Drop the cached entry for a connection. The next `get_token` acquires
    /// a new bearer.
    pub fn invalidate(&self, connection_id: Uuid) {
        let mut slots = self.slots.lock().expect("token cache lock poisoned");
        slots.remove(&connection_id);
    }

    async fn acquire(&self, connection_id: Uuid) -> Result<CachedToken> {
        let conn = self
            .connections
            .fetch_credentials(connection_id)
            .await?
            .ok_or(GatewayError::ConnectionNotFound(connection_id))?;
        if !conn.active {
            return Err(GatewayError::forbidden("Connection is deactivated"));
        }

        let response = self
            .client
            .post(&conn.token_url)
            .basic_auth(&conn.client_id, Some(&conn.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                let detail = if e.is_timeout() {
                    "token endpoint timed out".to_string()
                } else if e.is_connect() {
                    "token endpoint unreachable".to_string()
                } else {
                    "token request failed".to_string()
                };
                GatewayError::TokenAcquisition {
                    connection_id,
                    detail,
                }
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let detail = if status.as_u16() == 401 {
                "token endpoint rejected client credentials (401)".to_string()
            } else {
                format!("token endpoint returned HTTP {}", status.as_u16())
            };
            return Err(GatewayError::TokenAcquisition {
                connection_id,
                detail,
            });
        }

        let body: TokenEndpointResponse =
            response
                .json()
                .await
                .map_err(|_| GatewayError::TokenAcquisition {
                    connection_id,
                    detail: "token endpoint returned invalid JSON".to_string(),
                })?;

        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(CachedToken {
            access_token: body.access_token,
            expires_at_ms: chrono::Utc::now().timestamp_millis() + expires_in * 1000,
        })
    }
}
