//! # Route Table Module
//!
//! This module holds the per-service routing tables and classifies a request path as
//! public, protected or unmatched.
//!
//! ## Classification
//!
//! For a service, the public patterns are scanned first in declaration order, then the
//! protected entries in declaration order. The first pattern that matches wins, so a
//! specific pattern has to be declared before a wildcard pattern that would also match
//! the same path.
//!
//! ## Rust Concepts Used
//!
//! - The table is built once and shared behind an `Arc`; it has no interior mutability,
//!   so concurrent requests read it without locks.
//! - `RoutingDecision<'a>` borrows the matched pattern and role set from the table.
//! - `RouteTableBuilder` offers a fluent API and reports every invalid pattern at `build()`.

use std::collections::HashMap;
use tracing::debug;

use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Role, RoleSet, RoutingDecision};
use crate::routing::pattern::PathPattern;

/// Protected entry: a pattern and the roles allowed through it
#[derive(Debug, Clone)]
pub struct ProtectedRoute {
    pub pattern: PathPattern,
    pub roles: RoleSet,
}

/// Routing table of a single service
#[derive(Debug, Clone, Default)]
pub struct ServiceRoutes {
    /// Public patterns in declaration order
    pub public: Vec<PathPattern>,

    /// Protected entries in declaration order
    pub protected: Vec<ProtectedRoute>,
}

impl ServiceRoutes {
    /// Classify a full request path against this table
    pub fn classify(&self, path: &str) -> RoutingDecision<'_> {
        if self.public.iter().any(|pattern| pattern.matches(path)) {
            return RoutingDecision::Public;
        }

        self.protected
            .iter()
            .find(|route| route.pattern.matches(path))
            .map(|route| RoutingDecision::Protected {
                pattern: route.pattern.as_str(),
                roles: &route.roles,
            })
            .unwrap_or(RoutingDecision::Unmatched)
    }
}

/// Immutable set of routing tables keyed by service name
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    services: HashMap<String, ServiceRoutes>,
}

impl RouteTable {
    /// Build the table from validated configuration
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut builder = RouteTableBuilder::new();

        for service in &config.services {
            builder = builder.service(&service.name);
            for pattern in &service.public {
                builder = builder.public(&service.name, pattern);
            }
            for route in &service.protected {
                builder = builder.protected(&service.name, &route.path, &route.roles);
            }
        }

        builder.build()
    }

    /// Classify `path` for `service`
    ///
    /// An unknown service yields `Unmatched`. Pure: the same input always produces the
    /// same decision.
    pub fn classify(&self, service: &str, path: &str) -> RoutingDecision<'_> {
        let decision = match self.services.get(service) {
            Some(routes) => routes.classify(path),
            None => RoutingDecision::Unmatched,
        };

        debug!(service = %service, path = %path, decision = decision.label(), "Classified request path");
        decision
    }

    /// Whether a routing table exists for `service`
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Names of all services with a routing table
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

#[derive(Default)]
struct PendingService {
    public: Vec<String>,
    protected: Vec<(String, Vec<Role>)>,
}

/// Builder for creating route tables with a fluent API
#[derive(Default)]
pub struct RouteTableBuilder {
    order: Vec<String>,
    pending: HashMap<String, PendingService>,
}

impl RouteTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a service, even if it ends up with an empty table
    pub fn service(mut self, service: &str) -> Self {
        self.entry(service);
        self
    }

    /// Append a public pattern to `service`
    pub fn public(mut self, service: &str, pattern: &str) -> Self {
        self.entry(service).public.push(pattern.to_string());
        self
    }

    /// Append a protected pattern to `service`
    pub fn protected(mut self, service: &str, pattern: &str, roles: &[Role]) -> Self {
        self.entry(service)
            .protected
            .push((pattern.to_string(), roles.to_vec()));
        self
    }

    fn entry(&mut self, service: &str) -> &mut PendingService {
        if !self.pending.contains_key(service) {
            self.order.push(service.to_string());
        }
        self.pending.entry(service.to_string()).or_default()
    }

    /// Compile every pattern, reporting all failures at once
    pub fn build(mut self) -> GatewayResult<RouteTable> {
        let mut errors = Vec::new();
        let mut services = HashMap::new();

        for name in self.order {
            let Some(pending) = self.pending.remove(&name) else {
                continue;
            };
            let mut routes = ServiceRoutes::default();

            for pattern in pending.public {
                match PathPattern::compile(&pattern) {
                    Ok(compiled) => routes.public.push(compiled),
                    Err(e) => errors.push(format!("{}: {}", name, e)),
                }
            }

            for (pattern, roles) in pending.protected {
                if roles.is_empty() {
                    errors.push(format!("{}: protected route '{}' allows no roles", name, pattern));
                    continue;
                }
                match PathPattern::compile(&pattern) {
                    Ok(compiled) => routes.protected.push(ProtectedRoute {
                        pattern: compiled,
                        roles: roles.into_iter().collect(),
                    }),
                    Err(e) => errors.push(format!("{}: {}", name, e)),
                }
            }

            services.insert(name, routes);
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Invalid routing table:\n{}",
                errors.join("\n")
            )));
        }

        Ok(RouteTable { services })
    }
}
