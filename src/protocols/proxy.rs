//! # Upstream Forwarding Module
//!
//! This module relays an authorized request to the service that owns it and streams the
//! answer back to the caller.
//!
//! ## What happens to a forwarded request
//!
//! - The path is rewritten by stripping the service prefix (`/api/courses/create` becomes
//!   `/create`); the query string is kept.
//! - Hop-by-hop headers are removed, except the `Upgrade`/`Connection` pair of an
//!   upgrade request.
//! - Client-supplied `x-gateway-secret`, `x-gateway-user-id` and `x-gateway-user-role`
//!   are always dropped; the gateway's own values are then injected. A client can never
//!   forge gateway trust.
//! - `Content-Type: application/json` and `Accept: application/json` are set.
//! - JSON bodies are re-serialized; other bodies are relayed as-is. `Content-Length`
//!   always matches what is sent.
//! - `X-Forwarded-For`/`-Host`/`-Proto` and `x-request-id` are set and `Host` is rewritten
//!   to the upstream authority.
//!
//! ## Failure handling
//!
//! One timeout covers connecting and receiving the response head. On timeout or
//! connection failure the request is not retried; the caller gets
//! `UpstreamUnavailable` naming the service. Dropping the returned future (client went
//! away) drops the in-flight upstream call with it.
//!
//! ## Connection upgrades
//!
//! When the upstream answers `101 Switching Protocols`, the `101` is relayed to the client
//! and a background task splices the two upgraded connections together with
//! `tokio::io::copy_bidirectional`.
//!
//! ## Rust Concepts Used
//!
//! - `hyper_util::client::legacy::Client` keeps a connection pool per upstream host and is
//!   cheap to clone.
//! - `tokio::time::timeout` wraps the request future; elapsed means timeout.
//! - The response body (`hyper::body::Incoming`) is boxed into an axum `Body` without
//!   buffering, so large responses stream through.

use axum::body::Body;
use axum::http::header::{
    ACCEPT, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::auth::trust::GATEWAY_SECRET_HEADER;
use crate::core::config::{GatewayConfig, SecretString};
use crate::core::error::{GatewayError, GatewayResult, UpstreamFailure};
use crate::core::types::{Identity, RequestContext, REQUEST_ID_HEADER};
use crate::observability::logging::DataSanitizer;

/// Subject id of the caller, set by the gateway on allowed requests
pub const USER_ID_HEADER: &str = "x-gateway-user-id";

/// Role of the caller, set by the gateway on allowed requests
pub const USER_ROLE_HEADER: &str = "x-gateway-user-role";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers meaningful only for a single connection
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers only the gateway may set on an upstream request
const GATEWAY_OWNED_HEADERS: [&str; 3] = [GATEWAY_SECRET_HEADER, USER_ID_HEADER, USER_ROLE_HEADER];

/// Where and how requests for one service are forwarded
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Service name used in logs and error bodies
    pub service: String,

    /// Upstream base URL
    pub base_url: Url,

    /// Prefix removed from the inbound path
    pub strip_prefix: String,

    /// Headers set on every forwarded request (secret, content negotiation)
    injected_headers: HeaderMap,
}

impl UpstreamTarget {
    pub fn new(
        service: &str,
        base_url: &str,
        strip_prefix: &str,
        secret: &SecretString,
    ) -> GatewayResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            GatewayError::config(format!("Invalid URL for service '{}': {}", service, e))
        })?;

        let mut secret_value = HeaderValue::from_str(secret.expose()).map_err(|_| {
            GatewayError::config("gateway_secret contains characters not allowed in a header")
        })?;
        secret_value.set_sensitive(true);

        let mut injected_headers = HeaderMap::new();
        injected_headers.insert(HeaderName::from_static(GATEWAY_SECRET_HEADER), secret_value);
        injected_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        injected_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(Self {
            service: service.to_string(),
            base_url,
            strip_prefix: strip_prefix.to_string(),
            injected_headers,
        })
    }

    /// Strip the service prefix; an empty remainder becomes `/`
    pub fn rewrite_path(&self, path: &str) -> String {
        let rest = path.strip_prefix(self.strip_prefix.as_str()).unwrap_or(path);
        if rest.is_empty() {
            "/".to_string()
        } else if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        }
    }

    /// Full upstream URI for an inbound URI
    pub fn upstream_uri(&self, inbound: &Uri) -> GatewayResult<Uri> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = self.rewrite_path(inbound.path());
        let uri = match inbound.query() {
            Some(query) => format!("{}{}?{}", base, path, query),
            None => format!("{}{}", base, path),
        };

        uri.parse()
            .map_err(|e| GatewayError::internal(format!("Failed to build upstream URI: {}", e)))
    }

    /// `host[:port]` of the upstream, used as the forwarded `Host`
    pub fn authority(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Build the header map sent upstream from the inbound headers
    pub fn outbound_headers(
        &self,
        mut headers: HeaderMap,
        context: &RequestContext,
        body_len: Option<usize>,
        upgrade: bool,
    ) -> GatewayResult<HeaderMap> {
        let original_host = headers.get(HOST).cloned();
        let prior_forwarded_for = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        strip_hop_by_hop(&mut headers, upgrade);
        for name in GATEWAY_OWNED_HEADERS {
            headers.remove(name);
        }
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        for (name, value) in &self.injected_headers {
            headers.insert(name.clone(), value.clone());
        }

        if let Some(identity) = &context.identity {
            insert_identity(&mut headers, identity)?;
        }

        if let Some(addr) = context.client_addr {
            let forwarded_for = match prior_forwarded_for {
                Some(prior) => format!("{}, {}", prior, addr.ip()),
                None => addr.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
        // The listener is plain HTTP; a client-supplied value is never relayed.
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

        if let Ok(value) = HeaderValue::from_str(&context.request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }

        let authority = HeaderValue::from_str(&self.authority())
            .map_err(|e| GatewayError::internal(format!("Invalid upstream authority: {}", e)))?;
        headers.insert(HOST, authority);

        if let Some(len) = body_len {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }

        Ok(headers)
    }
}

fn insert_identity(headers: &mut HeaderMap, identity: &Identity) -> GatewayResult<()> {
    let subject = HeaderValue::from_str(&identity.subject_id)
        .map_err(|_| GatewayError::invalid_request("subject id is not a valid header value"))?;
    headers.insert(USER_ID_HEADER, subject);
    headers.insert(USER_ROLE_HEADER, HeaderValue::from_static(identity.role.as_str()));
    Ok(())
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP_HEADERS) {
        if keep_upgrade && (name == "connection" || name == "upgrade") {
            continue;
        }
        headers.remove(name);
    }
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers.contains_key(UPGRADE)
        && headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// JSON bodies are re-serialized; anything else is relayed unchanged
fn reserialize_body(body: Bytes) -> Bytes {
    if body.is_empty() {
        return body;
    }
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => serde_json::to_vec(&value).map(Bytes::from).unwrap_or(body),
        Err(_) => body,
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Immutable map of service name to upstream target
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    targets: HashMap<String, Arc<UpstreamTarget>>,
}

impl UpstreamRegistry {
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut targets = HashMap::new();
        for service in &config.services {
            let target = UpstreamTarget::new(
                &service.name,
                &service.url,
                &service.effective_strip_prefix(),
                &config.gateway_secret,
            )?;
            targets.insert(service.name.clone(), Arc::new(target));
        }
        Ok(Self { targets })
    }

    pub fn get(&self, service: &str) -> Option<Arc<UpstreamTarget>> {
        self.targets.get(service).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UpstreamTarget>> {
        self.targets.values()
    }
}

/// Relays requests to upstream services
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    max_body_size: usize,
    sanitizer: Arc<DataSanitizer>,
}

impl Forwarder {
    pub fn new(timeout: Duration, max_body_size: usize, sanitizer: Arc<DataSanitizer>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            timeout,
            max_body_size,
            sanitizer,
        }
    }

    pub fn from_config(config: &GatewayConfig, sanitizer: Arc<DataSanitizer>) -> Self {
        Self::new(
            config.server.timeouts.upstream_timeout,
            config.server.max_request_size,
            sanitizer,
        )
    }

    /// Forward `request` to `target` and return the streamed upstream response
    #[instrument(
        skip(self, target, context, request),
        fields(request_id = %context.request_id, service = %target.service)
    )]
    pub async fn forward(
        &self,
        target: &UpstreamTarget,
        context: &RequestContext,
        request: Request<Body>,
    ) -> GatewayResult<Response<Body>> {
        let (mut parts, body) = request.into_parts();
        let upgrade = is_upgrade_request(&parts.headers);
        let client_upgrade = if upgrade {
            parts.extensions.remove::<OnUpgrade>()
        } else {
            None
        };

        let body = if upgrade {
            Bytes::new()
        } else {
            reserialize_body(self.read_body(&parts.headers, body).await?)
        };

        let body_len = (carries_body(&parts.method) || !body.is_empty()).then_some(body.len());
        let uri = target.upstream_uri(&parts.uri)?;
        let headers = target.outbound_headers(
            std::mem::take(&mut parts.headers),
            context,
            body_len,
            upgrade,
        )?;

        debug!(
            method = %parts.method,
            upstream_uri = %uri,
            upgrade,
            "Forwarding request upstream"
        );

        let mut upstream_request = Request::new(Body::from(body));
        *upstream_request.method_mut() = parts.method;
        *upstream_request.uri_mut() = uri;
        *upstream_request.headers_mut() = headers;

        let sent = tokio::time::timeout(self.timeout, self.client.request(upstream_request)).await;
        let mut response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let reason = if e.is_connect() {
                    UpstreamFailure::ConnectionFailed
                } else {
                    UpstreamFailure::Protocol
                };
                return Err(self.upstream_failure(target, reason, &e.to_string()));
            }
            Err(_) => {
                let detail = format!("no response within {:?}", self.timeout);
                return Err(self.upstream_failure(target, UpstreamFailure::Timeout, &detail));
            }
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            match client_upgrade {
                Some(client_upgrade) => {
                    let upstream_upgrade = hyper::upgrade::on(&mut response);
                    tokio::spawn(tunnel(
                        target.service.clone(),
                        client_upgrade,
                        upstream_upgrade,
                    ));
                    info!("Connection upgraded");
                }
                None => warn!("Upstream switched protocols without an upgrade request"),
            }
            return Ok(response.map(Body::new));
        }

        strip_hop_by_hop(response.headers_mut(), false);
        debug!(status = response.status().as_u16(), "Upstream responded");
        Ok(response.map(Body::new))
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> GatewayResult<Bytes> {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());

        if declared.is_some_and(|len| len > self.max_body_size) {
            return Err(GatewayError::PayloadTooLarge {
                limit: self.max_body_size,
            });
        }

        let mut stream = body.into_data_stream();
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                GatewayError::invalid_request(format!("failed to read request body: {}", e))
            })?;
            if buffer.len() + chunk.len() > self.max_body_size {
                return Err(GatewayError::PayloadTooLarge {
                    limit: self.max_body_size,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }

    fn upstream_failure(
        &self,
        target: &UpstreamTarget,
        reason: UpstreamFailure,
        detail: &str,
    ) -> GatewayError {
        warn!(
            reason = reason.as_str(),
            detail = %self.sanitizer.sanitize(detail),
            "Upstream request failed"
        );
        counter!(
            "gateway_upstream_failures_total",
            "service" => target.service.clone(),
            "reason" => reason.as_str()
        )
        .increment(1);

        GatewayError::upstream_unavailable(target.service.clone(), reason)
    }
}

async fn tunnel(service: String, client: OnUpgrade, upstream: OnUpgrade) {
    match tokio::try_join!(client, upstream) {
        Ok((client, upstream)) => {
            let mut client = TokioIo::new(client);
            let mut upstream = TokioIo::new(upstream);
            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                Ok((sent, received)) => {
                    debug!(service = %service, sent, received, "Upgraded connection closed")
                }
                Err(e) => debug!(service = %service, error = %e, "Upgraded connection ended"),
            }
        }
        Err(e) => warn!(service = %service, error = %e, "Connection upgrade failed"),
    }
}
