//! # Request Pipeline
//!
//! Every proxied request runs through the same linear sequence of stages:
//!
//! 1. **classify**: match the path against the service's routing table
//! 2. **authenticate**: extract and validate a credential (skipped for unmatched paths)
//! 3. **authorize**: combine both into an allow/deny decision
//!
//! Each stage either hands an updated [`RequestContext`] to the next or returns a
//! terminal [`GatewayError`]; the `?` operator stops the sequence at the first failure
//! and the caller hands the error to the [`ErrorReporter`]. No stage mutates shared
//! state, so the same request always yields the same decision.

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::cookie::AuthCookiePolicy;
use crate::auth::decider::{AuthorizationDecider, CredentialState};
use crate::auth::extractor::CredentialExtractor;
use crate::auth::providers::{CredentialValidator, JwtCredentialValidator};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{
    AccessDecision, DenyReason, Identity, RequestContext, RoutingDecision, REQUEST_ID_HEADER,
};
use crate::routing::router::RouteTable;

/// Classification and authorization stages of the gateway
pub struct GatewayPipeline {
    routes: Arc<RouteTable>,
    extractor: CredentialExtractor,
    validator: Arc<dyn CredentialValidator>,
    decider: AuthorizationDecider,
}

impl GatewayPipeline {
    pub fn new(
        routes: Arc<RouteTable>,
        extractor: CredentialExtractor,
        validator: Arc<dyn CredentialValidator>,
    ) -> Self {
        Self {
            routes,
            extractor,
            validator,
            decider: AuthorizationDecider::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        Ok(Self::new(
            Arc::new(RouteTable::from_config(config)?),
            CredentialExtractor::new(config.auth.cookie_name.clone()),
            Arc::new(JwtCredentialValidator::from_config(&config.auth)),
        ))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Run every stage; on success the context carries the caller's identity, if any
    #[instrument(
        skip(self, context, headers),
        fields(request_id = %context.request_id, method = %context.method, path = %context.path)
    )]
    pub async fn admit(
        &self,
        context: RequestContext,
        headers: &HeaderMap,
    ) -> GatewayResult<RequestContext> {
        let service = context.service.as_deref().unwrap_or_default();
        let routing = self.routes.classify(service, &context.path);

        let credential = match routing {
            RoutingDecision::Unmatched => CredentialState::Absent,
            _ => self.authenticate(headers).await,
        };
        let rejection = match &credential {
            CredentialState::Invalid(e) => Some(e.to_string()),
            _ => None,
        };
        let role = match &credential {
            CredentialState::Valid(identity) => Some(identity.role),
            _ => None,
        };
        let credential_label = credential.label();

        let decision = self.decider.decide(&routing, credential);
        self.record(&context, &decision);

        match decision {
            AccessDecision::Allow { identity } => {
                debug!(
                    decision = routing.label(),
                    credential = credential_label,
                    "Request admitted"
                );
                Ok(context.with_identity(identity))
            }
            AccessDecision::Deny(DenyReason::NotFound) => Err(GatewayError::not_found(&context.path)),
            AccessDecision::Deny(DenyReason::Unauthenticated {
                credential_invalidated: false,
            }) => Err(GatewayError::unauthenticated("no credential provided")),
            AccessDecision::Deny(DenyReason::Unauthenticated {
                credential_invalidated: true,
            }) => Err(GatewayError::credential_rejected(
                rejection.unwrap_or_else(|| "credential rejected".to_string()),
            )),
            AccessDecision::Deny(DenyReason::Forbidden) => {
                let pattern = match routing {
                    RoutingDecision::Protected { pattern, .. } => pattern,
                    _ => "",
                };
                Err(GatewayError::forbidden(format!(
                    "role {} is not allowed on {}",
                    role.map(|r| r.as_str()).unwrap_or("none"),
                    pattern
                )))
            }
        }
    }

    /// Extract and validate the request's credential
    pub async fn authenticate(&self, headers: &HeaderMap) -> CredentialState {
        let Some(credential) = self.extractor.extract(headers) else {
            return CredentialState::Absent;
        };

        match self.validator.validate(&credential).await {
            Ok(identity) => CredentialState::Valid(identity),
            Err(e) => {
                debug!(
                    validator = self.validator.name(),
                    source = credential.source().as_str(),
                    reason = e.kind(),
                    "Credential rejected"
                );
                CredentialState::Invalid(e)
            }
        }
    }

    /// Identity of the caller if a valid credential is attached; never fails
    pub async fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        match self.authenticate(headers).await {
            CredentialState::Valid(identity) => Some(identity),
            _ => None,
        }
    }

    fn record(&self, context: &RequestContext, decision: &AccessDecision) {
        let service = context
            .service
            .as_deref()
            .filter(|service| self.routes.has_service(service))
            .unwrap_or("unknown")
            .to_string();
        let outcome = match decision {
            AccessDecision::Allow { .. } => "allowed",
            AccessDecision::Deny(DenyReason::NotFound) => "not_found",
            AccessDecision::Deny(DenyReason::Unauthenticated { .. }) => "unauthenticated",
            AccessDecision::Deny(DenyReason::Forbidden) => "forbidden",
        };

        counter!("gateway_requests_total", "service" => service, "outcome" => outcome).increment(1);
    }
}

/// Turns terminal pipeline failures into responses
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    cookie: AuthCookiePolicy,
}

impl ErrorReporter {
    pub fn new(cookie: AuthCookiePolicy) -> Self {
        Self { cookie }
    }

    /// Log `error` and build its response; rejected credentials get a clearing cookie
    pub fn report(&self, error: GatewayError, context: &RequestContext) -> Response {
        let status = error.status_code();

        if status.is_server_error() {
            error!(
                request_id = %context.request_id,
                status = status.as_u16(),
                error_type = error.error_type(),
                error = %error,
                "Request failed"
            );
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            warn!(
                request_id = %context.request_id,
                path = %context.path,
                status = status.as_u16(),
                error = %error,
                "Request denied"
            );
        } else {
            info!(
                request_id = %context.request_id,
                path = %context.path,
                status = status.as_u16(),
                error_type = error.error_type(),
                "Request rejected"
            );
        }

        let clears_credential = error.clears_credential();
        let mut response = error.into_response();

        if clears_credential {
            response
                .headers_mut()
                .append(SET_COOKIE, self.cookie.clear_cookie());
        }
        if let Ok(value) = HeaderValue::from_str(&context.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::providers::Claims;
    use crate::core::config::{AuthConfig, Environment, SecretString};
    use crate::core::error::UpstreamFailure;
    use crate::core::types::Role;
    use axum::body::Body;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "pipeline-secret";

    fn pipeline() -> GatewayPipeline {
        let config = GatewayConfig {
            auth: AuthConfig {
                jwt_secret: SecretString::new(SECRET),
                ..AuthConfig::default()
            },
            ..GatewayConfig::default()
        };
        GatewayPipeline::from_config(&config).unwrap()
    }

    fn bearer(role: &str, exp_offset: i64) -> HeaderMap {
        let claims = Claims {
            user_id: "user-42".to_string(),
            role: role.to_string(),
            exp: Utc::now().timestamp() + exp_offset,
            iat: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn context(path: &str) -> RequestContext {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        RequestContext::from_request(&request)
    }

    #[tokio::test]
    async fn test_public_route_needs_no_credential() {
        let admitted = pipeline()
            .admit(context("/api/courses/list"), &HeaderMap::new())
            .await
            .unwrap();
        assert!(admitted.identity.is_none());
    }

    #[tokio::test]
    async fn test_public_route_ignores_invalid_credential() {
        let admitted = pipeline()
            .admit(context("/api/courses/list"), &bearer("STUDENT", -60))
            .await
            .unwrap();
        assert!(admitted.identity.is_none());
    }

    #[tokio::test]
    async fn test_protected_route_attaches_identity() {
        let admitted = pipeline()
            .admit(context("/api/courses/create"), &bearer("ADMIN", 600))
            .await
            .unwrap();
        let identity = admitted.identity.unwrap();
        assert_eq!(identity.subject_id, "user-42");
        assert_eq!(identity.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_protected_route_denials() {
        let pipeline = pipeline();

        let missing = pipeline
            .admit(context("/api/courses/create"), &HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!missing.clears_credential());

        let expired = pipeline
            .admit(context("/api/auth/profile"), &bearer("STUDENT", -60))
            .await
            .unwrap_err();
        assert_eq!(expired.status_code(), StatusCode::UNAUTHORIZED);
        assert!(expired.clears_credential());

        let wrong_role = pipeline
            .admit(context("/api/courses/create"), &bearer("STUDENT", 600))
            .await
            .unwrap_err();
        assert_eq!(wrong_role.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unmatched_route_is_not_found_with_or_without_credential() {
        let pipeline = pipeline();
        for headers in [HeaderMap::new(), bearer("ADMIN", 600)] {
            let err = pipeline
                .admit(context("/api/unknown/route"), &headers)
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_identify_is_opportunistic() {
        let pipeline = pipeline();
        assert!(pipeline.identify(&HeaderMap::new()).await.is_none());
        assert!(pipeline.identify(&bearer("ADMIN", -60)).await.is_none());
        assert_eq!(
            pipeline.identify(&bearer("INSTRUCTOR", 600)).await.unwrap().role,
            Role::Instructor
        );
    }

    #[test]
    fn test_reporter_clears_cookie_only_for_rejected_credentials() {
        let reporter = ErrorReporter::new(AuthCookiePolicy::from_config(
            &AuthConfig::default(),
            Environment::Development,
        ));
        let ctx = context("/api/auth/profile");

        let rejected = reporter.report(GatewayError::credential_rejected("expired"), &ctx);
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        let cookie = rejected.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("auth_token=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert_eq!(
            rejected.headers().get(REQUEST_ID_HEADER).unwrap(),
            ctx.request_id.as_str()
        );

        let missing = reporter.report(GatewayError::unauthenticated("missing"), &ctx);
        assert!(missing.headers().get(SET_COOKIE).is_none());

        let upstream = reporter.report(
            GatewayError::upstream_unavailable("courses", UpstreamFailure::Timeout),
            &ctx,
        );
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
        assert!(upstream.headers().get(SET_COOKIE).is_none());
    }
}
