//! # Downstream Trust Guard
//!
//! Middleware for upstream services built on this crate. Every request except the
//! health probe must carry the gateway secret header with the shared value; anything
//! else is refused with `403 {"error": "gateway_required"}`. This keeps a service
//! that is reachable directly from becoming a bypass around the gateway.
//!
//! ```rust,ignore
//! let guard = GatewaySecretGuard::new(&secret);
//! let app = Router::new()
//!     .route("/profile", get(profile))
//!     .layer(axum::middleware::from_fn_with_state(guard, require_gateway_secret));
//! ```

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::core::config::SecretString;

/// Header carrying the shared gateway secret
pub const GATEWAY_SECRET_HEADER: &str = "x-gateway-secret";

/// Shared state of the trust middleware
#[derive(Clone)]
pub struct GatewaySecretGuard {
    expected: [u8; 32],
    exempt_paths: Arc<Vec<String>>,
}

impl GatewaySecretGuard {
    /// Guard that exempts only `/health`
    pub fn new(secret: &SecretString) -> Self {
        Self {
            expected: digest(secret.expose().as_bytes()),
            exempt_paths: Arc::new(vec!["/health".to_string()]),
        }
    }

    pub fn with_exempt_paths(mut self, paths: Vec<String>) -> Self {
        self.exempt_paths = Arc::new(paths);
        self
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| exempt == path)
    }

    /// Constant-time comparison of SHA-256 digests
    fn accepts(&self, presented: &[u8]) -> bool {
        let presented = digest(presented);
        self.expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn digest(value: &[u8]) -> [u8; 32] {
    Sha256::digest(value).into()
}

/// Axum middleware rejecting requests that did not come through the gateway
pub async fn require_gateway_secret(
    State(guard): State<GatewaySecretGuard>,
    request: Request,
    next: Next,
) -> Response {
    if guard.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let header = request.headers().get(GATEWAY_SECRET_HEADER);
    let header_present = header.is_some();
    let authorized = header
        .map(|value| guard.accepts(value.as_bytes()))
        .unwrap_or(false);

    if authorized {
        return next.run(request).await;
    }

    warn!(
        path = %request.uri().path(),
        header_present,
        "Rejected request without valid gateway secret"
    );
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "gateway_required",
            "message": "Access denied. Requests must come through the API Gateway.",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use axum::routing::get;
    use axum::Router;
    use axum_test::TestServer;

    fn app() -> Router {
        let guard = GatewaySecretGuard::new(&SecretString::new("shared-secret"));
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/profile", get(|| async { "profile" }))
            .layer(axum::middleware::from_fn_with_state(
                guard,
                require_gateway_secret,
            ))
    }

    fn secret_header(value: &'static str) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static(GATEWAY_SECRET_HEADER),
            HeaderValue::from_static(value),
        )
    }

    #[tokio::test]
    async fn test_health_is_exempt() {
        let server = TestServer::new(app()).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_secret_is_forbidden() {
        let server = TestServer::new(app()).unwrap();
        let response = server.get("/profile").await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "gateway_required");
    }

    #[tokio::test]
    async fn test_wrong_secret_is_forbidden() {
        let server = TestServer::new(app()).unwrap();
        let (name, value) = secret_header("guess");
        let response = server.get("/profile").add_header(name, value).await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_correct_secret_passes() {
        let server = TestServer::new(app()).unwrap();
        let (name, value) = secret_header("shared-secret");
        let response = server.get("/profile").add_header(name, value).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), "profile");
    }
}
