//! Logging, redaction and upstream readiness probing.

pub mod health;
pub mod logging;

pub use health::{ReadinessProbe, ReadinessReport, ServiceCheck, ServiceStatus};
pub use logging::{initialize_subscriber, DataSanitizer};
