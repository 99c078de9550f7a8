//! # HTTP Server Module
//!
//! This module wires the gateway together with the Axum framework. Every request that is
//! not one of the gateway's own endpoints falls through to [`handle_request`], which builds
//! a [`RequestContext`], runs the [`GatewayPipeline`] and forwards admitted requests to the
//! owning upstream.
//!
//! ## Endpoints
//!
//! - `GET /health`: process status plus the caller's identity, if a valid credential is attached
//! - `GET /ready`: upstream readiness, `503` while any upstream is down
//! - `GET /metrics`: Prometheus text exposition, when a recorder is installed
//! - everything else: the proxy pipeline
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing immutable tables across async tasks
//! - `async/await` for non-blocking I/O operations
//! - `tokio::net::TcpListener` for accepting incoming connections
//! - Tower layers for tracing, CORS and security headers

use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::cookie::AuthCookiePolicy;
use crate::core::config::{CorsConfig, GatewayConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{RequestContext, REQUEST_ID_HEADER};
use crate::gateway::pipeline::{ErrorReporter, GatewayPipeline};
use crate::observability::health::ReadinessProbe;
use crate::observability::logging::DataSanitizer;
use crate::protocols::proxy::{Forwarder, UpstreamRegistry};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// Route classification and authorization
    pub pipeline: Arc<GatewayPipeline>,

    /// Upstream targets by service name
    pub upstreams: Arc<UpstreamRegistry>,

    pub forwarder: Forwarder,

    /// Probe behind `/ready`
    pub readiness: ReadinessProbe,

    pub errors: ErrorReporter,

    /// Redaction for logged headers
    pub sanitizer: Arc<DataSanitizer>,

    /// Prometheus handle behind `/metrics`
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Build every component from a validated configuration
    pub fn new(config: &GatewayConfig, metrics: Option<PrometheusHandle>) -> GatewayResult<Self> {
        let sanitizer = Arc::new(DataSanitizer::from_config(config)?);

        Ok(Self {
            pipeline: Arc::new(GatewayPipeline::from_config(config)?),
            upstreams: Arc::new(UpstreamRegistry::from_config(config)?),
            forwarder: Forwarder::from_config(config, sanitizer.clone()),
            readiness: ReadinessProbe::new(config.server.timeouts.readiness_timeout)?,
            errors: ErrorReporter::new(AuthCookiePolicy::from_config(
                &config.auth,
                config.server.environment,
            )),
            sanitizer,
            metrics,
        })
    }
}

/// The edge gateway HTTP server
pub struct GatewayServer {
    state: ServerState,
    bind_addr: String,
    cors: CorsConfig,
}

impl GatewayServer {
    /// Create a new server; `config` must already be validated
    pub fn new(config: &GatewayConfig, metrics: Option<PrometheusHandle>) -> GatewayResult<Self> {
        let state = ServerState::new(config, metrics)?;

        info!(
            services = ?state.pipeline.routes().service_names().collect::<Vec<_>>(),
            upstream_timeout = ?config.server.timeouts.upstream_timeout,
            "Gateway server created"
        );

        Ok(Self {
            state,
            bind_addr: format!("{}:{}", config.server.bind_address, config.server.http_port),
            cors: config.cors.clone(),
        })
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Build the Axum router with all layers applied
    pub fn router(&self) -> GatewayResult<AxumRouter> {
        let mut app = AxumRouter::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_export))
            .fallback(handle_request)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetResponseHeaderLayer::if_not_present(
                        X_CONTENT_TYPE_OPTIONS,
                        HeaderValue::from_static("nosniff"),
                    ))
                    .layer(SetResponseHeaderLayer::if_not_present(
                        X_FRAME_OPTIONS,
                        HeaderValue::from_static("DENY"),
                    ))
                    .layer(SetResponseHeaderLayer::if_not_present(
                        REFERRER_POLICY,
                        HeaderValue::from_static("no-referrer"),
                    )),
            );

        if self.cors.enabled {
            app = app.layer(cors_layer(&self.cors)?);
            info!(origin = %self.cors.allowed_origin, "CORS enabled");
        }

        Ok(app.layer(TraceLayer::new_for_http()))
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router()?;

        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            GatewayError::internal(format!(
                "Failed to bind gateway server to {}: {}",
                self.bind_addr, e
            ))
        })?;

        info!("Gateway HTTP server listening on {}", self.bind_addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))?;

        info!("Gateway HTTP server stopped");
        Ok(())
    }
}

fn cors_layer(config: &CorsConfig) -> GatewayResult<CorsLayer> {
    let origin = HeaderValue::from_str(&config.allowed_origin)
        .map_err(|e| GatewayError::config(format!("Invalid CORS origin: {}", e)))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, ACCEPT]))
}

/// Fallback handler: classify, authorize and forward
pub async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let context = RequestContext::from_request(&request);

    debug!(
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        headers = ?state.sanitizer.sanitize_headers(request.headers()),
        "Request received"
    );

    match proxy_request(&state, context.clone(), request).await {
        Ok(response) => response,
        Err(error) => state.errors.report(error, &context),
    }
}

async fn proxy_request(
    state: &ServerState,
    context: RequestContext,
    request: Request,
) -> GatewayResult<Response> {
    let context = state.pipeline.admit(context, request.headers()).await?;

    // Admission only succeeds for services present in the route table
    let service = context.service.as_deref().unwrap_or_default();
    let target = state.upstreams.get(service).ok_or_else(|| {
        GatewayError::internal(format!("no upstream registered for service {}", service))
    })?;

    let mut response = state.forwarder.forward(&target, &context, request).await?;

    if let Ok(value) = HeaderValue::from_str(&context.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        service = %service,
        status = response.status().as_u16(),
        latency_ms = context.elapsed().as_millis() as u64,
        "Request completed"
    );

    Ok(response)
}

/// Gateway health check handler
pub async fn health_check(State(state): State<ServerState>, headers: HeaderMap) -> impl IntoResponse {
    let user = state.pipeline.identify(&headers).await.map(|identity| {
        json!({
            "userId": identity.subject_id,
            "role": identity.role,
        })
    });

    let health_info = json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "user": user,
    });

    (StatusCode::OK, Json(health_info))
}

/// Gateway readiness check handler
pub async fn readiness_check(State(state): State<ServerState>) -> impl IntoResponse {
    let report = state.readiness.check_all(&state.upstreams).await;
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}

/// Prometheus metrics handler
pub async fn metrics_export(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => GatewayError::not_found("/metrics").into_response(),
    }
}
