//! # Logging Module
//!
//! Subscriber initialisation and redaction of sensitive values.
//!
//! ## Key Features
//! - `tracing-subscriber` with an `EnvFilter` (`RUST_LOG` wins over the configured level)
//! - JSON or plain-text output
//! - `DataSanitizer`, applied to header dumps and upstream error text before they are
//!   logged, so bearer tokens, the auth cookie and configured secrets never reach the logs

use axum::http::HeaderMap;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::auth::trust::GATEWAY_SECRET_HEADER;
use crate::core::config::{GatewayConfig, LoggingConfig};
use crate::core::error::{GatewayError, GatewayResult};

const REDACTED: &str = "[REDACTED]";

/// Headers whose values are never logged
const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    GATEWAY_SECRET_HEADER,
];

/// Sensitive data sanitizer
#[derive(Debug)]
pub struct DataSanitizer {
    sensitive_patterns: Vec<Regex>,
}

impl DataSanitizer {
    /// Sanitizer for bearer tokens, JWTs and the given literal secrets
    pub fn new(secrets: &[&str]) -> GatewayResult<Self> {
        let mut patterns = vec![
            compile(r"(?i)bearer\s+[A-Za-z0-9\-._~+/]+=*")?,
            compile(r"eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]*")?,
        ];

        for secret in secrets.iter().filter(|secret| !secret.is_empty()) {
            patterns.push(compile(&regex::escape(secret))?);
        }

        Ok(Self {
            sensitive_patterns: patterns,
        })
    }

    /// Sanitizer covering the configured secrets and the auth cookie
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut sanitizer = Self::new(&[
            config.gateway_secret.expose(),
            config.auth.jwt_secret.expose(),
        ])?;

        let cookie = format!(r"{}=[^;\s]+", regex::escape(&config.auth.cookie_name));
        sanitizer.sensitive_patterns.push(compile(&cookie)?);
        Ok(sanitizer)
    }

    pub fn sanitize(&self, data: &str) -> String {
        let mut sanitized = data.to_string();

        for pattern in &self.sensitive_patterns {
            sanitized = pattern.replace_all(&sanitized, REDACTED).to_string();
        }

        sanitized
    }

    /// Header map rendered for logging
    pub fn sanitize_headers(&self, headers: &HeaderMap) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let rendered = if SENSITIVE_HEADERS.contains(&name.as_str()) || value.is_sensitive() {
                    REDACTED.to_string()
                } else {
                    self.sanitize(value.to_str().unwrap_or("<binary>"))
                };
                (name.as_str().to_string(), rendered)
            })
            .collect()
    }
}

fn compile(pattern: &str) -> GatewayResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| GatewayError::internal(format!("Failed to compile regex pattern: {}", e)))
}

/// Initialize the global tracing subscriber
pub fn initialize_subscriber(config: &LoggingConfig) -> GatewayResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .map_err(|e| GatewayError::config(format!("Invalid log filter: {}", e)))?;

    let result = match config.format.to_lowercase().as_str() {
        "json" => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        _ => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    // Tests and embedders may have installed a subscriber already
    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    info!(format = %config.format, level = %config.level, "Logging initialized");
    Ok(())
}
