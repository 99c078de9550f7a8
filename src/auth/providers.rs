//! # Credential Validators
//!
//! This module contains the credential validator abstraction and its JWT implementation.
//!
//! ## Rust Concepts Used
//!
//! - `#[async_trait]` lets the trait expose an async `validate` so a validator backed by a
//!   remote session store can suspend without blocking other requests.
//! - `Arc<dyn CredentialValidator>` is how the pipeline holds the validator.
//! - The JWT check itself is CPU-bound and holds no lock, so concurrent validations never
//!   serialize behind each other.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::auth::extractor::RawCredential;
use crate::core::config::AuthConfig;
use crate::core::types::{Identity, Role};

/// Why a credential was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The embedded expiry is in the past
    #[error("credential expired")]
    Expired,

    /// Unparseable credential, bad signature, or unusable claims
    #[error("malformed credential: {0}")]
    Malformed(String),
}

impl CredentialError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::Expired => "expired",
            CredentialError::Malformed(_) => "malformed",
        }
    }
}

/// Claims issued by the auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Verifies a raw credential and derives the caller's identity
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, credential: &RawCredential) -> Result<Identity, CredentialError>;

    /// Validator name for logging
    fn name(&self) -> &'static str;
}

/// HS256 JWT validator sharing its secret with the auth service
pub struct JwtCredentialValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialValidator {
    pub fn new(secret: &[u8], leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.expose().as_bytes(), config.leeway_secs)
    }

    fn identity_from(claims: Claims) -> Result<Identity, CredentialError> {
        let role = claims
            .role
            .parse::<Role>()
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;

        if claims.user_id.is_empty() {
            return Err(CredentialError::Malformed("empty userId claim".to_string()));
        }
        // Relayed upstream as a header value
        if !claims.user_id.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(CredentialError::Malformed(
                "userId claim must be visible ASCII".to_string(),
            ));
        }

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| CredentialError::Malformed("exp out of range".to_string()))?;

        Ok(Identity {
            subject_id: claims.user_id,
            role,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialValidator for JwtCredentialValidator {
    async fn validate(&self, credential: &RawCredential) -> Result<Identity, CredentialError> {
        let data = decode::<Claims>(credential.token(), &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Malformed(e.to_string()),
            })?;

        let identity = Self::identity_from(data.claims)?;
        // Leeway only applies to `nbf`; expiry is exact
        if identity.is_expired() {
            return Err(CredentialError::Expired);
        }

        debug!(
            subject_id = %identity.subject_id,
            role = %identity.role,
            source = credential.source().as_str(),
            "Credential validated"
        );
        Ok(identity)
    }

    fn name(&self) -> &'static str {
        "jwt"
    }
}
