// API key authentication middleware
//
// Validates the x-api-key header: format check first (no DB round-trip for
// junk), then one joined lookup of token + connection + tenant by the key's
// SHA-256. Attaches the flat auth row to the request and fires off the usage
// counter update without awaiting it.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use sdmg_storage::{Database, TokenAuthRow};

use super::api_key;

/// State for the API key middleware
#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<Database>,
}

/// Authenticated request context: the flat token + connection auth row.
#[derive(Clone)]
pub struct AuthContext(pub Arc<TokenAuthRow>);

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

pub async fn require_api_key(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(presented) = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    else {
        return reject(StatusCode::UNAUTHORIZED, "Missing API key");
    };

    if !api_key::is_valid_api_key_format(presented) {
        return reject(StatusCode::UNAUTHORIZED, "Invalid API key format");
    }

    let token_hash = api_key::hash_api_key(presented);
    let row = match state.db.find_token_for_auth(&token_hash).await {
        Ok(Some(row)) => row,
        Ok(None) => return reject(StatusCode::UNAUTHORIZED, "Invalid API key"),
        Err(e) => {
            tracing::error!("auth lookup failed: {e:#}");
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    if !row.token_active {
        return reject(StatusCode::UNAUTHORIZED, "API key has been deactivated");
    }
    if let Some(expires_at) = row.token_expires_at {
        if expires_at < Utc::now() {
            return reject(StatusCode::UNAUTHORIZED, "API key has expired");
        }
    }
    if !row.connection_active || !row.tenant_active {
        return reject(StatusCode::FORBIDDEN, "Connection has been deactivated");
    }

    // Fire-and-forget usage bookkeeping; a failure never affects the response.
    let db = state.db.clone();
    let token_id = row.token_id;
    tokio::spawn(async move {
        if let Err(e) = db.touch_token(token_id).await {
            tracing::warn!("failed to update token usage for {}: {e:#}", token_id);
        }
    });

    request.extensions_mut().insert(AuthContext(Arc::new(row)));
    next.run(request).await
}
