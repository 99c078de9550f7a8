//! # Edge Gateway Library - Core Library Crate
//!
//! Single entry point in front of the platform's auth, courses and organizations services.
//! Every request under `/api/<service>/...` is classified against that service's route
//! table, authenticated and authorized, and then forwarded to the owning service with the
//! shared gateway secret attached.
//!
//! ## Request Flow
//!
//! ```text
//! client -> RequestContext -> RouteTable::classify -> CredentialExtractor
//!        -> CredentialValidator -> AuthorizationDecider -> Forwarder -> upstream
//!                     \-------------- any failure -> ErrorReporter
//! ```
//!
//! The route table and upstream registry are built once at startup and only read
//! afterwards, so request handling shares no mutable state.

/// Core functionality including error types, configuration, and basic data structures
pub mod core;

/// Main gateway server implementation and the request pipeline
pub mod gateway;

/// Upstream forwarding
pub mod protocols;

/// Credential extraction, validation, authorization and the downstream trust guard
pub mod auth;

/// Per-service route tables and path patterns
pub mod routing;

/// Logging, redaction and upstream readiness
pub mod observability;

/// Main error type used throughout the gateway
pub use core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

pub use core::types::{Identity, RequestContext, Role};

/// Server entry point
pub use gateway::server::GatewayServer;
