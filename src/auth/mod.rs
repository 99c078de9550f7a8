//! # Authentication Module
//!
//! Credential extraction, validation and the authorization decision, plus the auth
//! cookie policy and the trust guard used by downstream services.

pub mod cookie;
pub mod decider;
pub mod extractor;
pub mod providers;
pub mod trust;

pub use cookie::AuthCookiePolicy;
pub use decider::{AuthorizationDecider, CredentialState};
pub use extractor::{CredentialExtractor, CredentialSource, RawCredential};
pub use providers::{Claims, CredentialError, CredentialValidator, JwtCredentialValidator};
pub use trust::{require_gateway_secret, GatewaySecretGuard, GATEWAY_SECRET_HEADER};
