// Single-call executor used by the orchestrator
//
// Non-streaming: the response body is buffered up to 1 MiB, further bytes
// are counted but discarded. On upstream 401 the bearer is invalidated and
// the call retried exactly once with a fresh token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Method;
use url::Url;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::oauth::TokenCache;
use crate::stores::{ConnectionCredentials, ConnectionStore};

/// Buffered response cap.
const MAX_BUFFERED_BODY: usize = 1024 * 1024;
const TRUNCATION_SUFFIX: &str = "\n...[truncated at 1MB]";
/// Deadline per upstream call.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one executed upstream call.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub status_code: u16,
    pub response_headers: HashMap<String, String>,
    /// Buffered body, lossily decoded; carries a truncation marker past 1 MiB.
    pub response_body: Option<String>,
    /// Full size in bytes, including discarded overflow.
    pub response_size_bytes: u64,
    pub duration_ms: u64,
}

/// Executes single upstream calls against a configured connection.
///
/// Connection base URLs are SSRF-validated when stored and again by the
/// proxy routes; this executor trusts the configured base URL.
pub struct ApiExecutor {
    connections: Arc<dyn ConnectionStore>,
    tokens: Arc<TokenCache>,
    client: reqwest::Client,
}

impl ApiExecutor {
    pub fn new(connections: Arc<dyn ConnectionStore>, tokens: Arc<TokenCache>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(EXECUTE_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            connections,
            tokens,
            client,
        }
    }

    /// Execute `method path` against the connection's base URL with a bearer
    /// from the token cache. Retries exactly once on upstream 401.
    pub async fn execute(
        &self,
        connection_id: Uuid,
        method: &str,
        path: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&serde_json::Value>,
    ) -> Result<ExecuteOutcome> {
        let conn = self
            .connections
            .fetch_credentials(connection_id)
            .await?
            .ok_or(GatewayError::ConnectionNotFound(connection_id))?;
        if !conn.active {
            return Err(GatewayError::forbidden("Connection is deactivated"));
        }

        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| GatewayError::bad_request(format!("Invalid HTTP method: {}", method)))?;

        let raw_target = format!("{}{}", conn.sap_base_url.trim_end_matches('/'), path);
        let target = Url::parse(&raw_target)
            .map_err(|_| GatewayError::bad_request(format!("Invalid target URL: {}", raw_target)))?;

        let start = Instant::now();
        let bearer = self.tokens.get_token(connection_id).await?;
        let response = self
            .send_once(&conn, &target, &method, headers, body, &bearer)
            .await?;

        let response = if response.status().as_u16() == 401 {
            // Stale bearer: drop it and retry exactly once with a fresh one.
            self.tokens.invalidate(connection_id);
            let bearer = self.tokens.get_token(connection_id).await?;
            self.send_once(&conn, &target, &method, headers, body, &bearer)
                .await?
        } else {
            response
        };

        let status_code = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let (response_body, response_size_bytes) = Self::read_capped(response).await?;

        Ok(ExecuteOutcome {
            status_code,
            response_headers,
            response_body,
            response_size_bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn send_once(
        &self,
        conn: &ConnectionCredentials,
        target: &Url,
        method: &Method,
        headers: Option<&HashMap<String, String>>,
        body: Option<&serde_json::Value>,
        bearer: &str,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method.clone(), target.clone());

        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        request = request.bearer_auth(bearer);

        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::UpstreamTimeout
            } else {
                tracing::warn!(connection = %conn.name, "upstream request failed: {}", e);
                GatewayError::UpstreamConnect
            }
        })
    }

    /// Buffer the response body up to the cap, counting everything.
    async fn read_capped(response: reqwest::Response) -> Result<(Option<String>, u64)> {
        let mut stream = response.bytes_stream();
        let mut buffered: Vec<u8> = Vec::new();
        let mut total: u64 = 0;
        let mut truncated = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::UpstreamTimeout
                } else {
                    GatewayError::UpstreamConnect
                }
            })?;
            total += chunk.len() as u64;
            if buffered.len() < MAX_BUFFERED_BODY {
                let room = MAX_BUFFERED_BODY - buffered.len();
                if chunk.len() > room {
                    buffered.extend_from_slice(&chunk[..room]);
                    truncated = true;
                } else {
                    buffered.extend_from_slice(&chunk);
                }
            } else if !chunk.is_empty() {
                truncated = true;
            }
        }

        if total == 0 {
            return Ok((None, 0));
        }

        let mut body = String::from_utf8_lossy(&buffered).into_owned();
        if truncated {
            body.push_str(TRUNCATION_SUFFIX);
        }
        Ok((Some(body), total))
    }
}
