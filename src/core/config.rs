//! # Configuration Module
//!
//! This module holds the gateway's static configuration: listener settings, credential
//! settings, the shared gateway secret, and the per-service routing tables. It is loaded
//! once at startup and never mutated afterwards; the server builds its immutable
//! [`RouteTable`](crate::routing::router::RouteTable) and upstream registry from it.
//!
//! ## Key Features
//! - YAML configuration parsing with serde (`GATEWAY_CONFIG_PATH`)
//! - Built-in defaults for the auth, courses and organizations services
//! - Environment variable overrides (`PORT`, `GATEWAY_SECRET`, `JWT_SECRET`, `*_SERVICE_URL`, ...)
//! - Validation that reports every problem at once
//!
//! ## Role casing
//!
//! Roles in route tables deserialize into [`Role`], which only accepts the canonical
//! upper-case form the auth service issues. A table written as `roles: [admin]` fails to
//! load instead of silently denying every request at runtime.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::Role;
use crate::routing::pattern::PathPattern;

/// String holding a secret value. `Debug` and `Serialize` never reveal it.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration
    pub server: ServerConfig,

    /// Credential validation and auth cookie settings
    pub auth: AuthConfig,

    /// Value injected as `x-gateway-secret` into every forwarded request
    pub gateway_secret: SecretString,

    /// Cross-origin settings for the browser frontend
    pub cors: CorsConfig,

    /// Upstream services with their routing tables, in declaration order
    pub services: Vec<ServiceDefinition>,

    /// Logging settings
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults with environment overrides applied, validated
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Recognised keys: `PORT`, `GATEWAY_BIND_ADDRESS`, `GATEWAY_SECRET`, `JWT_SECRET`,
    /// `FRONTEND_URL`, `NODE_ENV`, `GATEWAY_ENV`, `GATEWAY_UPSTREAM_TIMEOUT`,
    /// `GATEWAY_LOG_LEVEL`, `GATEWAY_LOG_FORMAT`, `AUTH_SERVICE_URL`, `COURSES_SERVICE_URL`,
    /// `ORGANIZATION_SERVICE_URL` and `GATEWAY_SERVICE_<NAME>_URL` for any service.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid PORT: {}", e)))?;
        }

        if let Some(addr) = lookup("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(secret) = lookup("GATEWAY_SECRET") {
            self.gateway_secret = SecretString::new(secret);
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = SecretString::new(secret);
        }

        if let Some(origin) = lookup("FRONTEND_URL") {
            self.cors.allowed_origin = origin;
        }

        // GATEWAY_ENV wins over NODE_ENV when both are set
        if let Some(env) = lookup("GATEWAY_ENV").or_else(|| lookup("NODE_ENV")) {
            self.server.environment = if env.eq_ignore_ascii_case("production") {
                Environment::Production
            } else {
                Environment::Development
            };
        }

        if let Some(timeout) = lookup("GATEWAY_UPSTREAM_TIMEOUT") {
            self.server.timeouts.upstream_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| {
                    GatewayError::config(format!("Invalid GATEWAY_UPSTREAM_TIMEOUT: {}", e))
                })?;
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = format;
        }

        for service in &mut self.services {
            let specific = format!(
                "GATEWAY_SERVICE_{}_URL",
                service.name.to_uppercase().replace('-', "_")
            );
            let legacy = match service.name.as_str() {
                "auth" => Some("AUTH_SERVICE_URL"),
                "courses" => Some("COURSES_SERVICE_URL"),
                "organizations" => Some("ORGANIZATION_SERVICE_URL"),
                _ => None,
            };

            if let Some(url) = lookup(&specific).or_else(|| legacy.and_then(|key| lookup(key))) {
                service.url = url;
            }
        }

        Ok(())
    }

    /// Comprehensive configuration validation with detailed error messages
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.max_request_size == 0 {
            errors.push("max_request_size must be greater than 0".to_string());
        }

        if self.server.timeouts.upstream_timeout.is_zero() {
            errors.push("upstream_timeout must be greater than 0".to_string());
        }

        if self.server.timeouts.readiness_timeout.is_zero() {
            errors.push("readiness_timeout must be greater than 0".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            errors.push("JWT secret cannot be empty (set JWT_SECRET)".to_string());
        }

        if self.gateway_secret.is_empty() {
            errors.push("gateway_secret cannot be empty (set GATEWAY_SECRET)".to_string());
        }

        if self.auth.cookie_name.is_empty()
            || !self
                .auth
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push(format!("Invalid auth cookie name: '{}'", self.auth.cookie_name));
        }

        if self.cors.enabled && self.cors.allowed_origin.parse::<Url>().is_err() {
            errors.push(format!("Invalid CORS origin: '{}'", self.cors.allowed_origin));
        }

        if self.services.is_empty() {
            errors.push("At least one service must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for (index, service) in self.services.iter().enumerate() {
            if service.name.is_empty() {
                errors.push(format!("Service {} has empty name", index));
                continue;
            }

            if !service
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            {
                errors.push(format!(
                    "Service name '{}' may only contain lower-case letters, digits, '-' and '_'",
                    service.name
                ));
            }

            if !seen.insert(service.name.as_str()) {
                errors.push(format!("Service '{}' is declared more than once", service.name));
            }

            match Url::parse(&service.url) {
                Ok(url) if url.scheme() == "http" => {}
                Ok(url) => errors.push(format!(
                    "Service '{}' has unsupported URL scheme '{}'",
                    service.name,
                    url.scheme()
                )),
                Err(e) => errors.push(format!(
                    "Service '{}' has invalid URL '{}': {}",
                    service.name, service.url, e
                )),
            }

            if let Some(prefix) = &service.strip_prefix {
                if !prefix.starts_with('/') {
                    errors.push(format!(
                        "Service '{}' strip_prefix must start with '/'",
                        service.name
                    ));
                }
            }

            let route_prefix = service.route_prefix();
            let patterns = service
                .public
                .iter()
                .chain(service.protected.iter().map(|route| &route.path));

            for pattern in patterns {
                if let Err(e) = PathPattern::compile(pattern) {
                    errors.push(format!("Service '{}': {}", service.name, e));
                }
                if pattern != &route_prefix && !pattern.starts_with(&format!("{}/", route_prefix)) {
                    errors.push(format!(
                        "Service '{}' pattern '{}' is outside '{}'",
                        service.name, pattern, route_prefix
                    ));
                }
            }

            for route in &service.protected {
                if route.roles.is_empty() {
                    errors.push(format!(
                        "Service '{}' protected route '{}' allows no roles",
                        service.name, route.path
                    ));
                }
            }
        }

        match self.observability.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!(
                "Invalid log level: {}",
                self.observability.logging.level
            )),
        }

        match self.observability.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!(
                "Invalid log format: {}",
                self.observability.logging.format
            )),
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Look up a service definition by name
    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|service| service.name == name)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            gateway_secret: SecretString::default(),
            cors: CorsConfig::default(),
            services: default_services(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Deployment environment; production turns on `Secure` auth cookies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub http_port: u16,

    /// Maximum request body size forwarded upstream
    pub max_request_size: usize,

    pub environment: Environment,

    /// Server timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8000,
            max_request_size: 10 * 1024 * 1024, // 10MB
            environment: Environment::Development,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Combined connect + response timeout for forwarded requests
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Timeout for each upstream `/health` probe behind `/ready`
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
            readiness_timeout: Duration::from_secs(2),
        }
    }
}

/// Credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret shared with the auth service (HS256)
    pub jwt_secret: SecretString,

    /// Name of the auth cookie checked before the `Authorization` header
    pub cookie_name: String,

    /// Max-Age of the auth cookie set on login
    #[serde(with = "humantime_serde")]
    pub cookie_max_age: Duration,

    /// Clock skew tolerated when checking `nbf`, in seconds; `exp` is always exact
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: SecretString::default(),
            cookie_name: "auth_token".to_string(),
            cookie_max_age: Duration::from_secs(24 * 60 * 60),
            leeway_secs: 0,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,

    /// Single browser origin allowed to send credentials
    pub allowed_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

/// One upstream service and its routing table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service name, also the `/api/<name>` path segment
    pub name: String,

    /// Base URL of the upstream
    pub url: String,

    /// Prefix removed before forwarding; defaults to `/api/<name>`
    #[serde(default)]
    pub strip_prefix: Option<String>,

    /// Public path patterns, first match wins
    #[serde(default)]
    pub public: Vec<String>,

    /// Protected path patterns with their allowed roles, first match wins
    #[serde(default)]
    pub protected: Vec<ProtectedRouteDefinition>,
}

impl ServiceDefinition {
    /// `/api/<name>`
    pub fn route_prefix(&self) -> String {
        format!("/api/{}", self.name)
    }

    /// Prefix stripped from the path before forwarding
    pub fn effective_strip_prefix(&self) -> String {
        self.strip_prefix
            .clone()
            .unwrap_or_else(|| self.route_prefix())
    }
}

/// Protected route entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedRouteDefinition {
    pub path: String,
    pub roles: Vec<Role>,
}

impl ProtectedRouteDefinition {
    pub fn new(path: &str, roles: &[Role]) -> Self {
        Self {
            path: path.to_string(),
            roles: roles.to_vec(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Routing tables for the auth, courses and organizations services
fn default_services() -> Vec<ServiceDefinition> {
    use Role::{Admin, Instructor, Student};

    let all = [Student, Instructor, Admin];

    vec![
        ServiceDefinition {
            name: "auth".to_string(),
            url: "http://localhost:8001".to_string(),
            strip_prefix: None,
            public: vec![
                "/api/auth/login".to_string(),
                "/api/auth/register".to_string(),
                "/api/auth/forgot-password".to_string(),
                "/api/auth/reset-password".to_string(),
                "/api/auth/refresh-token".to_string(),
            ],
            protected: vec![
                ProtectedRouteDefinition::new("/api/auth/profile", &all),
                ProtectedRouteDefinition::new("/api/auth/change-password", &all),
                ProtectedRouteDefinition::new("/api/auth/logout", &all),
                ProtectedRouteDefinition::new("/api/auth/users", &[Admin]),
            ],
        },
        ServiceDefinition {
            name: "courses".to_string(),
            url: "http://localhost:8002".to_string(),
            strip_prefix: None,
            public: vec![
                "/api/courses/list".to_string(),
                "/api/courses/search".to_string(),
                "/api/courses/categories".to_string(),
            ],
            protected: vec![
                ProtectedRouteDefinition::new("/api/courses/enroll", &[Student]),
                ProtectedRouteDefinition::new("/api/courses/my-courses", &[Student, Instructor]),
                ProtectedRouteDefinition::new("/api/courses/progress", &[Student]),
                ProtectedRouteDefinition::new("/api/courses/create", &[Instructor, Admin]),
                ProtectedRouteDefinition::new("/api/courses/edit", &[Instructor, Admin]),
                ProtectedRouteDefinition::new("/api/courses/delete", &[Admin]),
                ProtectedRouteDefinition::new("/api/courses/approve", &[Admin]),
                ProtectedRouteDefinition::new("/api/courses/analytics", &[Instructor, Admin]),
            ],
        },
        ServiceDefinition {
            name: "organizations".to_string(),
            url: "http://localhost:8003".to_string(),
            strip_prefix: None,
            public: vec!["/api/organizations".to_string()],
            protected: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::fs;

    fn configured() -> GatewayConfig {
        GatewayConfig {
            gateway_secret: SecretString::new("gateway-secret"),
            auth: AuthConfig {
                jwt_secret: SecretString::new("jwt-secret"),
                ..AuthConfig::default()
            },
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_default_config_with_secrets_is_valid() {
        configured().validate().unwrap();
    }

    #[test]
    fn test_default_config_requires_secrets() {
        let err = GatewayConfig::default().validate().unwrap_err().to_string();
        assert!(err.contains("JWT secret"));
        assert!(err.contains("gateway_secret"));
    }

    #[test]
    fn test_secrets_never_appear_in_debug_or_serialization() {
        let config = configured();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("gateway-secret"));
        assert!(!debug.contains("jwt-secret"));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("gateway-secret"));
        assert!(yaml.contains("[REDACTED]"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9100"),
            ("GATEWAY_SECRET", "from-env"),
            ("JWT_SECRET", "jwt-from-env"),
            ("COURSES_SERVICE_URL", "http://courses.internal:8080"),
            ("GATEWAY_SERVICE_AUTH_URL", "http://auth.internal:8080"),
            ("NODE_ENV", "production"),
            ("GATEWAY_UPSTREAM_TIMEOUT", "45s"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.http_port, 9100);
        assert_eq!(config.gateway_secret.expose(), "from-env");
        assert_eq!(config.auth.jwt_secret.expose(), "jwt-from-env");
        assert_eq!(config.service("courses").unwrap().url, "http://courses.internal:8080");
        assert_eq!(config.service("auth").unwrap().url, "http://auth.internal:8080");
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.server.timeouts.upstream_timeout, Duration::from_secs(45));
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_port_override_is_rejected() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(|key| (key == "PORT").then(|| "eighty".to_string()));
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[test]
    fn test_validation_reports_route_problems() {
        let mut config = configured();
        config.services.push(ServiceDefinition {
            name: "courses".to_string(),
            url: "ftp://nowhere".to_string(),
            strip_prefix: None,
            public: vec!["/api/other/list".to_string(), "/api/courses/img*".to_string()],
            protected: vec![ProtectedRouteDefinition::new("/api/courses/x", &[])],
        });

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("declared more than once"));
        assert!(err.contains("unsupported URL scheme"));
        assert!(err.contains("outside '/api/courses'"));
        assert!(err.contains("wildcard"));
        assert!(err.contains("allows no roles"));
    }

    #[test]
    fn test_default_tables_use_issuer_role_casing() {
        // The auth service issues STUDENT / INSTRUCTOR / ADMIN
        let config = GatewayConfig::default();
        for service in &config.services {
            for route in &service.protected {
                for role in &route.roles {
                    let issued = role.as_str();
                    assert_eq!(issued, issued.to_uppercase());
                    assert_eq!(issued.parse::<Role>().unwrap(), *role);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gateway.yaml");

        let config_content = r#"
server:
  bind_address: "127.0.0.1"
  http_port: 9080
  timeouts:
    upstream_timeout: "10s"
auth:
  jwt_secret: "file-jwt-secret"
  cookie_name: "session"
gateway_secret: "file-gateway-secret"
services:
  - name: "courses"
    url: "http://localhost:9002"
    public:
      - "/api/courses/list"
      - "/api/courses/*/preview"
    protected:
      - path: "/api/courses/create"
        roles: [INSTRUCTOR, ADMIN]
observability:
  logging:
    level: "debug"
    format: "text"
"#;

        fs::write(&config_path, config_content).await.unwrap();

        let config = GatewayConfig::load_from_file(&config_path).await.unwrap();

        assert_eq!(config.server.http_port, 9080);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.timeouts.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.auth.cookie_name, "session");
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].public.len(), 2);
        assert_eq!(
            config.services[0].protected[0].roles,
            vec![Role::Instructor, Role::Admin]
        );
        assert_eq!(config.observability.logging.format, "text");
    }

    #[tokio::test]
    async fn test_lowercase_roles_fail_at_load_time() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("gateway.yaml");

        let config_content = r#"
auth:
  jwt_secret: "s"
gateway_secret: "g"
services:
  - name: "courses"
    url: "http://localhost:9002"
    protected:
      - path: "/api/courses/delete"
        roles: [admin]
"#;

        fs::write(&config_path, config_content).await.unwrap();

        let result = GatewayConfig::load_from_file(&config_path).await;
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }
}
