// Authentication module
// Decision: gateway API keys for the data plane, JWT bearers for the
// dashboard plane (minted by the control plane, revocable here)

pub mod api_key;
pub mod jwt;
pub mod middleware;
pub mod revocation;

pub use middleware::{require_api_key, AuthContext, AuthState};
pub use revocation::RevocationSet;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

/// State for the session routes
#[derive(Clone)]
pub struct SessionState {
    pub jwt_secret: String,
    pub revocations: Arc<RevocationSet>,
}

/// Revoke the presented access token. The control plane mints tokens; the
/// gateway only needs to be able to kill one early.
async fn logout(
    State(state): State<SessionState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Missing bearer token"})),
            )
        })?;

    let claims = jwt::verify(&state.jwt_secret, bearer, &state.revocations).map_err(|e| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    state.revocations.insert(claims.jti, claims.exp);
    Ok(Json(json!({"status": "logged_out"})))
}

pub fn routes(state: SessionState) -> Router {
    Router::new()
        .route("/auth/logout", post(logout))
        .with_state(state)
}
