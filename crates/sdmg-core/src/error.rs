// Error types for the gateway engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur in the gateway data plane.
///
/// The HTTP layer maps these onto status codes: `BadRequest` → 400,
/// `Unauthorized` → 401, `Forbidden` → 403, `UpstreamConnect` → 502,
/// `UpstreamTimeout` → 504, `Conflict` → 409, everything else → 500.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed client input
    #[error("{0}")]
    BadRequest(String),

    /// Missing, invalid or expired gateway credential
    #[error("{0}")]
    Unauthorized(String),

    /// Deactivated resource or policy-forbidden target
    #[error("{0}")]
    Forbidden(String),

    /// Upstream connect failure. The original cause is never surfaced to
    /// clients; it may carry connection details.
    #[error("Upstream connection failed")]
    UpstreamConnect,

    /// Upstream deadline exceeded
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// The token endpoint rejected the client-credentials exchange
    #[error("Token acquisition failed for connection {connection_id}: {detail}")]
    TokenAcquisition { connection_id: Uuid, detail: String },

    /// Connection missing from the store
    #[error("Connection not found: {0}")]
    ConnectionNotFound(Uuid),

    /// Unique-constraint violation during a write
    #[error("{0}")]
    Conflict(String),

    /// Database or logic error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Create a bad-request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        GatewayError::BadRequest(msg.into())
    }

    /// Create an auth error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    /// Create a policy error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        GatewayError::Forbidden(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        GatewayError::Conflict(msg.into())
    }

    /// Create an internal error from a plain message
    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(anyhow::anyhow!(msg.into()))
    }
}
