// Streaming reverse proxy
//
// Forwards one inbound request to a validated upstream target with sanitized
// headers and injected credentials, then streams the upstream response body
// straight through to the client. Request bodies are buffered (which is what
// makes the exact content-length and the dm route's single 401 retry
// possible); response bodies are metered but never buffered.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use futures::Stream;

use sdmg_core::url_guard::ValidatedTarget;
use sdmg_core::GatewayError;

/// Default deadline for a proxied call.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(120);

/// Hop-by-hop and dangerous headers, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
    "x-api-key",
];

/// What the proxy observed once the response finished (or failed).
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    pub status_code: u16,
    pub response_size_bytes: u64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

/// True when the method carries a request body through the proxy.
pub fn has_request_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Inbound headers minus the hop-by-hop set. `content-length` is dropped too;
/// the client sets it from the actual body.
pub fn sanitize_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut sanitized = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) || *name == CONTENT_LENGTH {
            continue;
        }
        sanitized.append(name, value.clone());
    }
    sanitized
}

/// Upstream response headers minus the hop-by-hop set.
pub fn sanitize_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut sanitized = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        sanitized.append(name, value.clone());
    }
    sanitized
}

/// Issue one upstream request. Bodyless methods additionally lose
/// `content-type` (some upstreams misinterpret a typed empty body on GET).
/// Override headers are applied after the filter, so they can replace a
/// filtered value.
pub async fn forward_once(
    target: &ValidatedTarget,
    method: Method,
    inbound_headers: &HeaderMap,
    overrides: &HeaderMap,
    body: Option<Bytes>,
    timeout: Duration,
) -> Result<reqwest::Response, GatewayError> {
    let mut headers = sanitize_request_headers(inbound_headers);
    if body.is_none() {
        headers.remove(CONTENT_TYPE);
    }
    for (name, value) in overrides {
        headers.insert(name, value.clone());
    }

    let client = target.client(timeout)?;
    let mut request = client
        .request(method, target.url.clone())
        .headers(headers);
    if let Some(body) = body {
        request = request.body(body);
    }

    request.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout
        } else {
            tracing::warn!("upstream request failed: {}", e);
            GatewayError::UpstreamConnect
        }
    })
}

/// Turn an upstream response into a downstream one, streaming the body.
/// `on_complete` fires exactly once when the body finishes, errors out, or
/// the client walks away.
pub fn relay_response(
    upstream: reqwest::Response,
    started: Instant,
    on_complete: impl FnOnce(ProxyOutcome) + Send + 'static,
) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = sanitize_response_headers(upstream.headers());

    let metered = MeteredStream {
        inner: Box::pin(upstream.bytes_stream()),
        status_code: status.as_u16(),
        bytes: 0,
        started,
        on_complete: Some(Box::new(on_complete)),
    };

    let mut response = Response::new(Body::from_stream(metered));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Byte-counting passthrough over the upstream body stream.
struct MeteredStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    status_code: u16,
    bytes: u64,
    started: Instant,
    on_complete: Option<Box<dyn FnOnce(ProxyOutcome) + Send>>,
}

impl MeteredStream {
    fn finish(&mut self, error_message: Option<String>) {
        if let Some(callback) = self.on_complete.take() {
            callback(ProxyOutcome {
                status_code: self.status_code,
                response_size_bytes: self.bytes,
                duration_ms: self.started.elapsed().as_millis() as u64,
                error_message,
            });
        }
    }
}

impl Stream for MeteredStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finish(Some(format!("upstream body error: {}", e)));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finish(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        // Client disconnected mid-stream; dropping the inner stream tears
        // down the upstream connection.
        self.finish(Some("response stream aborted".to_string()));
    }
}
