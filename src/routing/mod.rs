//! Request classification: path patterns and per-service routing tables.

pub mod pattern;
pub mod router;

pub use pattern::PathPattern;
pub use router::{ProtectedRoute, RouteTable, RouteTableBuilder, ServiceRoutes};
