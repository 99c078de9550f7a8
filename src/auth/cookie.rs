//! Auth cookie policy.
//!
//! The auth service sets the cookie on login; the gateway only ever clears it, when a
//! credential fails validation on a protected route. Both sides build the header from
//! the same policy so the attributes match and the browser actually drops the cookie.

use axum::http::HeaderValue;
use std::time::Duration;

use crate::core::config::{AuthConfig, Environment};
use crate::core::error::{GatewayError, GatewayResult};

/// Attributes of the auth cookie
#[derive(Debug, Clone)]
pub struct AuthCookiePolicy {
    name: String,
    max_age: Duration,
    secure: bool,
}

impl AuthCookiePolicy {
    pub fn new<S: Into<String>>(name: S, max_age: Duration, secure: bool) -> Self {
        Self {
            name: name.into(),
            max_age,
            secure,
        }
    }

    /// `Secure` is only set in production
    pub fn from_config(auth: &AuthConfig, environment: Environment) -> Self {
        Self::new(
            auth.cookie_name.clone(),
            auth.cookie_max_age,
            environment == Environment::Production,
        )
    }

    /// `Set-Cookie` value carrying a freshly issued credential
    pub fn set_cookie(&self, token: &str) -> GatewayResult<HeaderValue> {
        HeaderValue::from_str(&self.render(token, self.max_age.as_secs()))
            .map_err(|_| GatewayError::invalid_request("credential is not a valid cookie value"))
    }

    /// `Set-Cookie` value that makes the browser drop the cookie
    pub fn clear_cookie(&self) -> HeaderValue {
        // Cookie names are validated at config load, so this cannot fail in practice
        HeaderValue::from_str(&self.render("", 0))
            .unwrap_or_else(|_| HeaderValue::from_static("auth_token=; Path=/; Max-Age=0"))
    }

    fn render(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
            self.name, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}
