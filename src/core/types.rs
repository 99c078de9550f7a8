//! # Core Types Module
//!
//! This module defines the data that flows through a single request: the caller's
//! [`Role`] and [`Identity`], the per-request [`RequestContext`], and the two transient
//! decision values computed for every request ([`RoutingDecision`] and
//! [`AccessDecision`]).
//!
//! ## Ownership
//!
//! - `RoutingDecision<'a>` borrows from the immutable route table, so classifying a
//!   request never clones configuration.
//! - `Identity` is owned by the request context and dropped with it. Nothing here is
//!   shared between requests.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Header used to correlate a request across the gateway and upstream logs
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller role as emitted by the auth service.
///
/// The canonical textual form is upper case (`STUDENT`, `INSTRUCTOR`, `ADMIN`), which
/// is what the credential issuer puts in the `role` claim. Configuration and credentials
/// are both parsed with exact, case-sensitive matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Instructor, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Instructor => "INSTRUCTOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role string is not in canonical form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}' (expected one of STUDENT, INSTRUCTOR, ADMIN)")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Set of roles allowed on a protected route
pub type RoleSet = BTreeSet<Role>;

/// Identity derived from a validated credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Subject (user) id from the credential
    pub subject_id: String,

    /// Role claimed by the credential
    pub role: Role,

    /// Expiry embedded in the credential
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Outcome of matching a path against a service's route table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision<'a> {
    /// A public pattern matched; no credential is required
    Public,

    /// A protected pattern matched; one of `roles` is required
    Protected {
        pattern: &'a str,
        roles: &'a RoleSet,
    },

    /// Nothing in the table matched
    Unmatched,
}

impl RoutingDecision<'_> {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RoutingDecision::Public => "public",
            RoutingDecision::Protected { .. } => "protected",
            RoutingDecision::Unmatched => "unmatched",
        }
    }
}

/// Reason a request was refused by the authorization decider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The path is not in the routing table
    NotFound,

    /// No credential, or a credential that failed validation. `credential_invalidated`
    /// is set in the latter case so the auth cookie gets cleared.
    Unauthenticated { credential_invalidated: bool },

    /// Valid identity whose role is not in the allowed set
    Forbidden,
}

/// Final allow/deny decision for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow { identity: Option<Identity> },
    Deny(DenyReason),
}

/// Per-request context carried explicitly through the pipeline
///
/// This replaces attaching ad-hoc fields to a shared request object: every stage gets
/// the context by value and hands back an updated one.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for tracing and logging)
    pub request_id: String,

    /// Service segment of the path (`/api/<service>/...`), if any
    pub service: Option<String>,

    /// Full request path, without the query string
    pub path: String,

    pub method: Method,

    /// Client's remote address, when the server was started with connect info
    pub client_addr: Option<SocketAddr>,

    /// Identity attached once a credential has been validated
    pub identity: Option<Identity>,

    /// Request start time for latency measurement
    pub received_at: Instant,
}

impl RequestContext {
    /// Build the context for an inbound request
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let path = request.uri().path().to_string();
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        Self {
            request_id: request_id_from(request.headers()),
            service: service_segment(&path).map(str::to_string),
            path,
            method: request.method().clone(),
            client_addr,
            identity: None,
            received_at: Instant::now(),
        }
    }

    /// Attach a validated identity
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    /// Get elapsed time since request started
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Reuse a well-formed client request id, otherwise mint a new one
fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::new_v4)
        .to_string()
}

/// Extract `<service>` from `/api/<service>` or `/api/<service>/...`
pub fn service_segment(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/api/")?;
    let service = rest.split('/').next()?;
    if service.is_empty() {
        None
    } else {
        Some(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[test]
    fn test_role_parsing_is_case_sensitive() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("STUDENT".parse::<Role>().unwrap(), Role::Student);
        assert!("admin".parse::<Role>().is_err());
        assert!("Instructor".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_uses_canonical_form() {
        let json = serde_json::to_string(&Role::Instructor).unwrap();
        assert_eq!(json, "\"INSTRUCTOR\"");
        assert!(serde_json::from_str::<Role>("\"instructor\"").is_err());
    }

    #[test]
    fn test_service_segment() {
        assert_eq!(service_segment("/api/courses/list"), Some("courses"));
        assert_eq!(service_segment("/api/organizations"), Some("organizations"));
        assert_eq!(service_segment("/api/"), None);
        assert_eq!(service_segment("/health"), None);
        assert_eq!(service_segment("/apix/courses"), None);
    }

    #[test]
    fn test_request_context_creation() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/courses/create?draft=true")
            .body(Body::empty())
            .unwrap();

        let context = RequestContext::from_request(&request);
        assert_eq!(context.path, "/api/courses/create");
        assert_eq!(context.service.as_deref(), Some("courses"));
        assert!(context.identity.is_none());
        assert!(Uuid::parse_str(&context.request_id).is_ok());
    }

    #[test]
    fn test_request_id_reused_only_when_well_formed() {
        let id = Uuid::new_v4().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&id).unwrap());
        assert_eq!(request_id_from(&headers), id);

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_ne!(request_id_from(&headers), "not-a-uuid");
    }
}
