// Fire-and-forget request logging
//
// Handlers assemble a CreateRequestLog after the response settles and hand it
// here; the insert runs on its own task and never joins the request path. A
// write failure is one stderr line, nothing more.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use sdmg_storage::{CreateRequestLog, Database};

/// Headers whose values never reach the log.
const REDACTED_HEADERS: &[&str] = &["authorization", "x-api-key", "proxy-authorization"];

#[derive(Clone)]
pub struct RequestLogger {
    db: Arc<Database>,
}

impl RequestLogger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist asynchronously; the caller continues immediately.
    pub fn record(&self, entry: CreateRequestLog) {
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(e) = db.insert_request_log(entry).await {
                tracing::error!("failed to persist request log: {e:#}");
            }
        });
    }
}

/// Request headers as a JSON object with credentials redacted.
pub fn redact_headers(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let rendered = if REDACTED_HEADERS.contains(&name.as_str()) {
            "[REDACTED]".to_string()
        } else {
            value.to_str().unwrap_or("[non-ascii]").to_string()
        };
        map.insert(name.as_str().to_string(), Value::String(rendered));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_redact_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_static("sdmg_0123456789abcdef0123456789abcdef01234567"),
        );
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let redacted = redact_headers(&headers);

        assert_eq!(redacted["authorization"], "[REDACTED]");
        assert_eq!(redacted["x-api-key"], "[REDACTED]");
        assert_eq!(redacted["accept"], "application/json");

        // No plaintext credential survives serialization.
        let serialized = redacted.to_string();
        assert!(!serialized.contains("secret"));
        assert!(!serialized.contains("sdmg_0123"));
    }
}
