// Gateway data-plane routes
//
// /gw/health       - liveness, unauthenticated
// /gw/dm/*         - streaming proxy to the connection's SAP DM base URL with
//                    an injected bearer; one retry on upstream 401
// /gw/agent/*      - streaming proxy to the connection's agent API with the
//                    decrypted agent key; no retry
// /gw/query        - orchestrated batch, explicit or auto-resolved
// /gw/use-case/:slug - stored template resolved against caller context
//
// Every authenticated route re-validates the target URL (lexical + DNS with
// address pinning) at request time and logs through the fire-and-forget
// request logger after the response settles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware as axum_middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use sdmg_core::orchestrator::{ExecutionMode, Orchestrator, OrchestratorCall, OrchestratorResult};
use sdmg_core::resolver::{AutoResolver, OverrideSource, ResolvedPlan};
use sdmg_core::url_guard::{self, ValidatedTarget};
use sdmg_core::{GatewayError, TokenCache, MAX_BATCH_CALLS};
use sdmg_storage::{CreateRequestLog, Database, Vault};

use crate::auth::{require_api_key, AuthContext, AuthState};
use crate::logger::{redact_headers, RequestLogger};
use crate::proxy;

/// Cap on buffered proxy request bodies.
const MAX_REQUEST_BODY: usize = 25 * 1024 * 1024;
/// Stored request-body excerpt length in log rows.
const LOGGED_BODY_LIMIT: usize = 2048;

/// App state shared across gateway routes
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub vault: Arc<Vault>,
    pub tokens: Arc<TokenCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub resolver: Arc<AutoResolver>,
    pub logger: Arc<RequestLogger>,
    /// Development mode relaxes the URL guard to allow http targets
    pub allow_http: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

fn error_response(err: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
        GatewayError::UpstreamConnect | GatewayError::TokenAcquisition { .. } => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Conflict(_) => StatusCode::CONFLICT,
        GatewayError::ConnectionNotFound(_) | GatewayError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    // Internals never serialize verbatim; they could carry connection detail.
    let message = match err {
        GatewayError::Internal(_) | GatewayError::ConnectionNotFound(_) => {
            "Internal server error".to_string()
        }
        GatewayError::TokenAcquisition { .. } => "Failed to acquire upstream token".to_string(),
        other => other.to_string(),
    };
    (status, Json(ErrorResponse { error: message }))
}

// ============================================
// Health
// ============================================

/// Liveness probe
#[utoipa::path(
    get,
    path = "/gw/health",
    responses(
        (status = 200, description = "Gateway is healthy")
    ),
    tag = "gateway"
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

// ============================================
// Proxy routes
// ============================================

/// Pieces of a proxied request that outlive the response stream.
struct ProxyLogContext {
    logger: Arc<RequestLogger>,
    entry: CreateRequestLog,
}

impl ProxyLogContext {
    fn new(
        logger: Arc<RequestLogger>,
        auth: &AuthContext,
        target: &'static str,
        method: &Method,
        path: String,
        headers: &HeaderMap,
        body_size: usize,
    ) -> Self {
        Self {
            logger,
            entry: CreateRequestLog {
                token_id: auth.0.token_id,
                connection_id: auth.0.connection_id,
                direction: "inbound".to_string(),
                target: target.to_string(),
                method: method.to_string(),
                path,
                request_headers: redact_headers(headers),
                request_body_size: body_size as i64,
                request_body: None,
                status_code: None,
                response_headers: None,
                response_size_bytes: 0,
                duration_ms: 0,
                error_message: None,
            },
        }
    }

    /// Log a request that failed before any upstream response existed.
    fn record_failure(mut self, err: &GatewayError, started: Instant) {
        let (status, _) = error_response(err);
        self.entry.status_code = Some(status.as_u16() as i32);
        self.entry.duration_ms = started.elapsed().as_millis() as i64;
        self.entry.error_message = Some(err.to_string());
        self.logger.record(self.entry);
    }

    /// Stream the upstream response downstream, logging once it settles.
    fn record_streamed(mut self, upstream: reqwest::Response, started: Instant) -> Response {
        self.entry.response_headers = Some(redact_headers(upstream.headers()));
        let logger = self.logger;
        let mut entry = self.entry;
        proxy::relay_response(upstream, started, move |outcome| {
            entry.status_code = Some(outcome.status_code as i32);
            entry.response_size_bytes = outcome.response_size_bytes as i64;
            entry.duration_ms = outcome.duration_ms as i64;
            entry.error_message = outcome.error_message;
            logger.record(entry);
        })
    }
}

async fn read_proxy_body(
    method: &Method,
    request: Request,
) -> Result<Option<axum::body::Bytes>, GatewayError> {
    if !proxy::has_request_body(method) {
        return Ok(None);
    }
    let bytes = axum::body::to_bytes(request.into_body(), MAX_REQUEST_BODY)
        .await
        .map_err(|_| GatewayError::bad_request("Failed to read request body"))?;
    Ok(Some(bytes))
}

async fn validate_target(raw: &str, allow_http: bool) -> Result<ValidatedTarget, GatewayError> {
    url_guard::validate(raw, allow_http)
        .await
        .map_err(|v| GatewayError::bad_request(format!("Target URL rejected: {}", v)))
}

fn bearer_overrides(bearer: &str) -> Result<HeaderMap, GatewayError> {
    let mut overrides = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {}", bearer))
        .map_err(|_| GatewayError::internal("bearer token is not a valid header value"))?;
    overrides.insert("authorization", value);
    Ok(overrides)
}

/// Proxy to the connection's SAP DM base URL.
#[utoipa::path(
    get,
    path = "/gw/dm/{path}",
    params(("path" = String, Path, description = "Upstream subpath")),
    responses(
        (status = 200, description = "Upstream response, streamed"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 502, description = "Upstream connection failed"),
        (status = 504, description = "Upstream request timed out")
    ),
    tag = "gateway"
)]
pub async fn proxy_dm(
    State(state): State<GatewayState>,
    Extension(auth): Extension<AuthContext>,
    Path(subpath): Path<String>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let inbound_headers = request.headers().clone();
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let forward_path = format!("/{}{}", subpath, query);

    let log = |body_size: usize| {
        ProxyLogContext::new(
            state.logger.clone(),
            &auth,
            "sap_dm",
            &method,
            format!("/gw/dm{}", forward_path),
            &inbound_headers,
            body_size,
        )
    };

    let body = match read_proxy_body(&method, request).await {
        Ok(body) => body,
        Err(e) => {
            log(0).record_failure(&e, started);
            return error_response(&e).into_response();
        }
    };
    let body_size = body.as_ref().map(|b| b.len()).unwrap_or(0);

    let raw_target = format!(
        "{}{}",
        auth.0.sap_base_url.trim_end_matches('/'),
        forward_path
    );
    let connection_id = auth.0.connection_id;

    let outcome = async {
        let target = validate_target(&raw_target, state.allow_http).await?;
        let bearer = state.tokens.get_token(connection_id).await?;
        let overrides = bearer_overrides(&bearer)?;

        let upstream = proxy::forward_once(
            &target,
            method.clone(),
            &inbound_headers,
            &overrides,
            body.clone(),
            proxy::PROXY_TIMEOUT,
        )
        .await?;

        if upstream.status().as_u16() != 401 {
            return Ok(upstream);
        }

        // Stale bearer: invalidate, refresh, repeat the whole call once.
        // No downstream bytes have been sent at this point.
        state.tokens.invalidate(connection_id);
        let bearer = state.tokens.get_token(connection_id).await?;
        let overrides = bearer_overrides(&bearer)?;
        proxy::forward_once(
            &target,
            method.clone(),
            &inbound_headers,
            &overrides,
            body.clone(),
            proxy::PROXY_TIMEOUT,
        )
        .await
    }
    .await;

    match outcome {
        Ok(upstream) => log(body_size).record_streamed(upstream, started),
        Err(e) => {
            log(body_size).record_failure(&e, started);
            error_response(&e).into_response()
        }
    }
}

/// Proxy to the connection's agent API.
#[utoipa::path(
    post,
    path = "/gw/agent/{path}",
    params(("path" = String, Path, description = "Agent API subpath")),
    responses(
        (status = 200, description = "Agent response, streamed"),
        (status = 400, description = "Connection has no agent API configured"),
        (status = 401, description = "Missing or invalid API key")
    ),
    tag = "gateway"
)]
pub async fn proxy_agent(
    State(state): State<GatewayState>,
    Extension(auth): Extension<AuthContext>,
    Path(subpath): Path<String>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let inbound_headers = request.headers().clone();
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let forward_path = format!("/{}{}", subpath, query);

    let log = |body_size: usize| {
        ProxyLogContext::new(
            state.logger.clone(),
            &auth,
            "agent",
            &method,
            format!("/gw/agent{}", forward_path),
            &inbound_headers,
            body_size,
        )
    };

    let (Some(agent_api_url), Some(agent_key_enc)) =
        (auth.0.agent_api_url.clone(), auth.0.agent_api_key_enc.clone())
    else {
        let e = GatewayError::bad_request("Agent API is not configured for this connection");
        log(0).record_failure(&e, started);
        return error_response(&e).into_response();
    };

    let body = match read_proxy_body(&method, request).await {
        Ok(body) => body,
        Err(e) => {
            log(0).record_failure(&e, started);
            return error_response(&e).into_response();
        }
    };
    let body_size = body.as_ref().map(|b| b.len()).unwrap_or(0);

    let outcome = async {
        let agent_key = state
            .vault
            .decrypt(&agent_key_enc)
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?;
        let raw_target = format!("{}{}", agent_api_url.trim_end_matches('/'), forward_path);
        let target = validate_target(&raw_target, state.allow_http).await?;

        let mut overrides = HeaderMap::new();
        overrides.insert(
            "x-api-key",
            HeaderValue::from_str(&agent_key)
                .map_err(|_| GatewayError::internal("agent key is not a valid header value"))?,
        );

        proxy::forward_once(
            &target,
            method.clone(),
            &inbound_headers,
            &overrides,
            body,
            proxy::PROXY_TIMEOUT,
        )
        .await
    }
    .await;

    match outcome {
        Ok(upstream) => log(body_size).record_streamed(upstream, started),
        Err(e) => {
            log(body_size).record_failure(&e, started);
            error_response(&e).into_response()
        }
    }
}

// ============================================
// Orchestrated query
// ============================================

/// The two accepted body shapes of POST /gw/query.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum QueryRequest {
    Explicit {
        calls: Vec<OrchestratorCall>,
        #[serde(default)]
        mode: Option<ExecutionMode>,
    },
    Auto {
        slugs: Vec<String>,
        #[serde(default)]
        context: HashMap<String, String>,
        #[serde(default)]
        overrides: Option<HashMap<String, HashMap<String, OverrideSource>>>,
    },
}

/// Auto-resolved responses carry the plan next to the execution result.
#[derive(Debug, Serialize)]
struct AutoQueryResponse {
    #[serde(flatten)]
    result: OrchestratorResult,
    resolution: ResolvedPlan,
}

fn validate_slugs(slugs: &[String]) -> Result<(), GatewayError> {
    if slugs.is_empty() {
        return Err(GatewayError::bad_request("At least one slug is required"));
    }
    if slugs.len() > MAX_BATCH_CALLS {
        return Err(GatewayError::bad_request(format!(
            "Too many calls in batch: {} (maximum {})",
            slugs.len(),
            MAX_BATCH_CALLS
        )));
    }
    if slugs.iter().any(|s| s.trim().is_empty()) {
        return Err(GatewayError::bad_request("Each call must name a slug"));
    }
    Ok(())
}

/// Serialize the payload once, log with its true size, respond.
fn respond_logged<T: Serialize>(
    state: &GatewayState,
    auth: &AuthContext,
    path: &str,
    request_excerpt: Option<String>,
    started: Instant,
    payload: &T,
) -> Response {
    let body = match serde_json::to_vec(payload) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("response serialization failed: {}", e);
            let e = GatewayError::internal("response serialization failed");
            return error_response(&e).into_response();
        }
    };

    state.logger.record(CreateRequestLog {
        token_id: auth.0.token_id,
        connection_id: auth.0.connection_id,
        direction: "inbound".to_string(),
        target: "sap_dm".to_string(),
        method: "POST".to_string(),
        path: path.to_string(),
        request_headers: json!({}),
        request_body_size: request_excerpt.as_ref().map(|b| b.len() as i64).unwrap_or(0),
        request_body: request_excerpt,
        status_code: Some(StatusCode::OK.as_u16() as i32),
        response_headers: None,
        response_size_bytes: body.len() as i64,
        duration_ms: started.elapsed().as_millis() as i64,
        error_message: None,
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn body_excerpt<T: Serialize>(request: &T) -> Option<String> {
    serde_json::to_string(request).ok().map(|mut s| {
        s.truncate(LOGGED_BODY_LIMIT);
        s
    })
}

/// Execute a batch of named calls.
#[utoipa::path(
    post,
    path = "/gw/query",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Orchestrator result"),
        (status = 400, description = "Invalid batch shape"),
        (status = 401, description = "Missing or invalid API key")
    ),
    tag = "gateway"
)]
pub async fn query(
    State(state): State<GatewayState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<QueryRequest>,
) -> Response {
    let started = Instant::now();
    let tenant_id = auth.0.connection_tenant_id;
    let connection_id = auth.0.connection_id;

    match request {
        QueryRequest::Explicit { calls, mode } => {
            let slugs: Vec<String> = calls.iter().map(|c| c.slug.clone()).collect();
            if let Err(e) = validate_slugs(&slugs) {
                return error_response(&e).into_response();
            }
            let excerpt = body_excerpt(&json!({"calls": &slugs, "mode": mode}));

            let mode = mode.unwrap_or(ExecutionMode::Parallel);
            match state
                .orchestrator
                .run(tenant_id, connection_id, &calls, mode, None)
                .await
            {
                Ok(result) => {
                    respond_logged(&state, &auth, "/gw/query", excerpt, started, &result)
                }
                Err(e) => error_response(&e).into_response(),
            }
        }
        QueryRequest::Auto {
            slugs,
            context,
            overrides,
        } => {
            if let Err(e) = validate_slugs(&slugs) {
                return error_response(&e).into_response();
            }
            let excerpt = body_excerpt(&json!({"slugs": &slugs, "context": &context}));

            match run_auto_resolved(&state, tenant_id, connection_id, &slugs, &context, overrides.as_ref())
                .await
            {
                Ok(response) => {
                    respond_logged(&state, &auth, "/gw/query", excerpt, started, &response)
                }
                Err(e) => error_response(&e).into_response(),
            }
        }
    }
}

async fn run_auto_resolved(
    state: &GatewayState,
    tenant_id: Uuid,
    connection_id: Uuid,
    slugs: &[String],
    context: &HashMap<String, String>,
    overrides: Option<&HashMap<String, HashMap<String, OverrideSource>>>,
) -> Result<AutoQueryResponse, GatewayError> {
    let plan = state
        .resolver
        .resolve(tenant_id, slugs, context, overrides)
        .await?;

    let calls: Vec<OrchestratorCall> = plan
        .calls
        .iter()
        .map(|c| OrchestratorCall {
            slug: c.slug.clone(),
            params: c.params.clone(),
            headers: HashMap::new(),
            body: None,
        })
        .collect();

    let result = state
        .orchestrator
        .run(
            tenant_id,
            connection_id,
            &calls,
            ExecutionMode::Sequential,
            Some(&plan.dynamic_deps),
        )
        .await?;

    Ok(AutoQueryResponse {
        result,
        resolution: plan,
    })
}

// ============================================
// Use-case templates
// ============================================

#[derive(Debug, Deserialize)]
pub struct UseCaseRequest {
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Run a stored use-case template against the caller's context.
#[utoipa::path(
    post,
    path = "/gw/use-case/{slug}",
    params(("slug" = String, Path, description = "Template slug")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Orchestrator result"),
        (status = 400, description = "Missing required context"),
        (status = 404, description = "Template not found")
    ),
    tag = "gateway"
)]
pub async fn use_case(
    State(state): State<GatewayState>,
    Extension(auth): Extension<AuthContext>,
    Path(slug): Path<String>,
    Json(request): Json<UseCaseRequest>,
) -> Response {
    let started = Instant::now();
    let tenant_id = auth.0.connection_tenant_id;
    let connection_id = auth.0.connection_id;

    let template = match state.db.get_use_case_template(tenant_id, &slug).await {
        Ok(Some(template)) => template,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Use case template not found".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("template lookup failed: {e:#}");
            return error_response(&GatewayError::Internal(e)).into_response();
        }
    };

    let missing: Vec<&str> = template
        .required_context
        .iter()
        .filter(|key| !request.context.contains_key(*key))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        let e = GatewayError::bad_request(format!(
            "Missing required context: {}",
            missing.join(", ")
        ));
        return error_response(&e).into_response();
    }

    let excerpt = body_excerpt(&json!({"template": &slug, "context": &request.context}));
    let path = format!("/gw/use-case/{}", slug);

    match run_auto_resolved(
        &state,
        tenant_id,
        connection_id,
        &template.api_slugs,
        &request.context,
        None,
    )
    .await
    {
        Ok(response) => respond_logged(&state, &auth, &path, excerpt, started, &response),
        Err(e) => error_response(&e).into_response(),
    }
}

// ============================================
// Router
// ============================================

pub fn routes(state: GatewayState, auth_state: AuthState) -> Router {
    let protected = Router::new()
        .route("/gw/dm/*path", any(proxy_dm))
        .route("/gw/agent/*path", post(proxy_agent))
        .route("/gw/query", post(query))
        .route("/gw/use-case/:slug", post(use_case))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            require_api_key,
        ))
        .with_state(state);

    Router::new().route("/gw/health", get(health)).merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_route() {
        let app = Router::new().route("/gw/health", get(health));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/gw/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"status":"healthy"}"#);
    }

    #[test]
    fn test_query_request_explicit_shape() {
        let body = json!({
            "calls": [{"slug": "a"}, {"slug": "b", "params": {"plant": "P1"}}],
            "mode": "sequential"
        });
        let parsed: QueryRequest = serde_json::from_value(body).unwrap();

        match parsed {
            QueryRequest::Explicit { calls, mode } => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[1].params.get("plant").map(String::as_str), Some("P1"));
                assert_eq!(mode, Some(ExecutionMode::Sequential));
            }
            other => panic!("expected explicit shape, got {:?}", other),
        }
    }

    #[test]
    fn test_query_request_auto_shape() {
        let body = json!({
            "slugs": ["a", "b"],
            "context": {"plant": "P1"},
            "overrides": {
                "b": {"plant": {"sourceSlug": "a", "sourcePath": "value[0].plant"}}
            }
        });
        let parsed: QueryRequest = serde_json::from_value(body).unwrap();

        match parsed {
            QueryRequest::Auto {
                slugs,
                context,
                overrides,
            } => {
                assert_eq!(slugs, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(context.get("plant").map(String::as_str), Some("P1"));
                let o = overrides.unwrap();
                assert_eq!(o["b"]["plant"].source_slug, "a");
            }
            other => panic!("expected auto shape, got {:?}", other),
        }
    }

    #[test]
    fn test_query_request_rejects_junk() {
        assert!(serde_json::from_value::<QueryRequest>(json!({"nope": true})).is_err());
    }

    #[test]
    fn test_validate_slugs() {
        assert!(validate_slugs(&[]).is_err());
        assert!(validate_slugs(&["".to_string()]).is_err());
        assert!(validate_slugs(&vec!["a".to_string(); 21]).is_err());
        assert!(validate_slugs(&vec!["a".to_string(); 20]).is_ok());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (GatewayError::bad_request("x"), StatusCode::BAD_REQUEST),
            (GatewayError::unauthorized("x"), StatusCode::UNAUTHORIZED),
            (GatewayError::forbidden("x"), StatusCode::FORBIDDEN),
            (GatewayError::UpstreamConnect, StatusCode::BAD_GATEWAY),
            (GatewayError::UpstreamTimeout, StatusCode::GATEWAY_TIMEOUT),
            (GatewayError::conflict("x"), StatusCode::CONFLICT),
            (
                GatewayError::internal("db exploded"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = error_response(&err);
            assert_eq!(status, expected, "for {:?}", err);
        }
    }

    #[test]
    fn test_internal_errors_are_not_serialized_verbatim() {
        let (_, Json(body)) = error_response(&GatewayError::internal(
            "password=supersecret leaked from driver",
        ));
        assert_eq!(body.error, "Internal server error");
    }

    #[test]
    fn test_bearer_overrides() {
        let overrides = bearer_overrides("tok-123").unwrap();
        assert_eq!(overrides.get("authorization").unwrap(), "Bearer tok-123");
    }
}
