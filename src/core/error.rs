//! # Error Handling Module
//!
//! This module defines every failure the gateway can produce and how each one is
//! reported to the caller. It uses the `thiserror` crate for the `Display`/`Error`
//! implementations and implements axum's `IntoResponse` so handlers can return
//! `GatewayResult<Response>` and let the `?` operator do the rest.
//!
//! ## Failure taxonomy
//!
//! | Variant                | Status | `error` code            |
//! |------------------------|--------|-------------------------|
//! | `Unauthenticated`      | 401    | `unauthenticated`       |
//! | `Forbidden`            | 403    | `forbidden`             |
//! | `NotFound`             | 404    | `not_found`             |
//! | `PayloadTooLarge`      | 413    | `payload_too_large`     |
//! | `InvalidRequest`       | 400    | `invalid_request`       |
//! | `UpstreamUnavailable`  | 502    | `upstream_unavailable`  |
//! | everything else        | 500    | `internal_error` / ...  |
//!
//! Classification and authorization failures are resolved inside the gateway and never
//! reach an upstream. Upstream failures are caught at the forwarding boundary and turned
//! into `UpstreamUnavailable`, which only carries the service name and a classified
//! reason so raw socket errors never reach the client.
//!
//! ## Response body
//!
//! Every error response is JSON with a stable, machine-readable `error` field:
//! ```json
//! { "error": "upstream_unavailable", "message": "Service courses is unavailable", "service": "courses", "reason": "connection_failed" }
//! ```
//! Internal and configuration failures are reported with a generic message; their
//! detail only goes to the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use std::fmt;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Why an upstream call failed, reduced to a category that is safe to show clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// The combined connect + response timeout elapsed
    Timeout,
    /// The TCP connection could not be established
    ConnectionFailed,
    /// The connection was established but the exchange failed
    Protocol,
}

impl UpstreamFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamFailure::Timeout => "timeout",
            UpstreamFailure::ConnectionFailed => "connection_failed",
            UpstreamFailure::Protocol => "protocol_error",
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the gateway
///
/// Each variant represents a different category of failure. The `#[error("...")]`
/// attribute from `thiserror` implements `Display` with the given message; that
/// message is what ends up in logs, while `public_message` is what clients see.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No credential, an invalid credential, or an expired credential on a protected route
    #[error("Authentication failed: {reason}")]
    Unauthenticated {
        reason: String,
        /// The auth cookie must be cleared on the response
        clear_credential: bool,
    },

    /// Valid credential whose role is not allowed on the route
    #[error("Insufficient permissions: {reason}")]
    Forbidden { reason: String },

    /// No routing-table entry matches the request
    #[error("Route not found: {path}")]
    NotFound { path: String },

    /// Upstream service could not be reached or did not answer in time
    #[error("Service {service} is unavailable ({reason})")]
    UpstreamUnavailable {
        service: String,
        reason: UpstreamFailure,
    },

    /// Request body larger than the configured limit
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Request could not be read or is otherwise unusable
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Missing credential: nothing to clear
    pub fn unauthenticated<S: Into<String>>(reason: S) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
            clear_credential: false,
        }
    }

    /// Rejected credential: the client must stop sending it
    pub fn credential_rejected<S: Into<String>>(reason: S) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
            clear_credential: true,
        }
    }

    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a service unavailable error
    pub fn upstream_unavailable<S: Into<String>>(service: S, reason: UpstreamFailure) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason,
        }
    }

    pub fn invalid_request<S: Into<String>>(reason: S) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code used in the `error` field of responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }

    /// Whether the response must carry a clearing `Set-Cookie` for the auth cookie
    pub fn clears_credential(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated {
                clear_credential: true,
                ..
            }
        )
    }

    /// Message shown to clients. Anything that could carry internal detail is
    /// replaced with a generic sentence.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated {
                clear_credential: false,
                ..
            } => "No authentication token provided".to_string(),
            Self::Unauthenticated { .. } => "Invalid or expired token".to_string(),
            Self::Forbidden { .. } => "Insufficient permissions".to_string(),
            Self::NotFound { .. } => "Route not found".to_string(),
            Self::UpstreamUnavailable { service, .. } => {
                format!("Service {} is unavailable", service)
            }
            Self::PayloadTooLarge { .. } | Self::InvalidRequest { .. } => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Implement conversion from Infallible for handler compatibility
impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Implement `IntoResponse` for `GatewayError` to automatically convert errors into HTTP responses
///
/// The auth cookie is not known here, so clearing it is left to
/// [`crate::gateway::pipeline::ErrorReporter`], which wraps this conversion.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Self::UpstreamUnavailable { service, reason } => json!({
                "error": self.error_type(),
                "message": self.public_message(),
                "service": service,
                "reason": reason.as_str(),
            }),
            _ => json!({
                "error": self.error_type(),
                "message": self.public_message(),
            }),
        };

        (status, Json(body)).into_response()
    }
}
