//! # Credential Extraction
//!
//! Pulls a raw bearer credential out of a request. The named auth cookie is checked
//! first; only if it is absent or empty is the `Authorization: Bearer <token>` header
//! consulted. Nothing here validates the credential.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use std::fmt;

/// Where a credential was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cookie,
    AuthorizationHeader,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Cookie => "cookie",
            CredentialSource::AuthorizationHeader => "authorization_header",
        }
    }
}

/// Unvalidated credential value. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct RawCredential {
    token: String,
    source: CredentialSource,
}

impl RawCredential {
    pub fn new<S: Into<String>>(token: S, source: CredentialSource) -> Self {
        Self {
            token: token.into(),
            source,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for RawCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCredential")
            .field("token", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Syntactic credential extractor
#[derive(Debug, Clone)]
pub struct CredentialExtractor {
    cookie_name: String,
}

impl CredentialExtractor {
    pub fn new<S: Into<String>>(cookie_name: S) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    /// Extract the credential, cookie first
    pub fn extract(&self, headers: &HeaderMap) -> Option<RawCredential> {
        self.from_cookie(headers)
            .map(|token| RawCredential::new(token, CredentialSource::Cookie))
            .or_else(|| {
                bearer_token(headers)
                    .map(|token| RawCredential::new(token, CredentialSource::AuthorizationHeader))
            })
    }

    fn from_cookie<'h>(&self, headers: &'h HeaderMap) -> Option<&'h str> {
        let prefix = format!("{}=", self.cookie_name);

        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .find_map(|cookie| cookie.trim().strip_prefix(prefix.as_str()))
            .map(|value| value.trim_matches('"'))
            .filter(|value| !value.is_empty())
    }
}

/// Second space-delimited token of a `Bearer` authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();

    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    parts.next().filter(|token| !token.is_empty())
}
