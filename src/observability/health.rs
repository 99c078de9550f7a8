//! # Readiness Module
//!
//! Probes every upstream's `/health` endpoint for the gateway's `/ready` endpoint.
//! Probes run concurrently, each with its own short timeout, so one slow service
//! cannot hold up the whole report.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::protocols::proxy::{UpstreamRegistry, UpstreamTarget};

/// Status of a single upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Up,
    Down,
}

/// Result of probing one upstream
#[derive(Debug, Clone, Serialize)]
pub struct ServiceCheck {
    pub service: String,
    pub status: ServiceStatus,
    pub latency_ms: u64,
    /// Short failure reason; never raw client error text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregated readiness of all upstreams
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceCheck>,
}

impl ReadinessReport {
    fn new(mut services: Vec<ServiceCheck>) -> Self {
        services.sort_by(|a, b| a.service.cmp(&b.service));
        Self {
            ready: services.iter().all(|check| check.status == ServiceStatus::Up),
            timestamp: Utc::now(),
            services,
        }
    }
}

/// HTTP probe for upstream `/health` endpoints
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: HttpClient,
}

impl ReadinessProbe {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Probe every registered upstream
    pub async fn check_all(&self, upstreams: &UpstreamRegistry) -> ReadinessReport {
        let checks = join_all(upstreams.iter().map(|target| self.check(target))).await;
        ReadinessReport::new(checks)
    }

    async fn check(&self, target: &UpstreamTarget) -> ServiceCheck {
        let url = format!("{}/health", target.base_url.as_str().trim_end_matches('/'));
        let start = Instant::now();
        let result = self.client.get(&url).send().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(response) if response.status().is_success() => (ServiceStatus::Up, None),
            Ok(response) => (
                ServiceStatus::Down,
                Some(format!("unexpected status {}", response.status().as_u16())),
            ),
            Err(e) if e.is_timeout() => (ServiceStatus::Down, Some("timeout".to_string())),
            Err(e) if e.is_connect() => {
                (ServiceStatus::Down, Some("connection_failed".to_string()))
            }
            Err(_) => (ServiceStatus::Down, Some("request_failed".to_string())),
        };

        match status {
            ServiceStatus::Up => debug!(service = %target.service, latency_ms, "Upstream ready"),
            ServiceStatus::Down => warn!(
                service = %target.service,
                latency_ms,
                reason = message.as_deref().unwrap_or_default(),
                "Upstream not ready"
            ),
        }

        ServiceCheck {
            service: target.service.clone(),
            status,
            latency_ms,
            message,
        }
    }
}
