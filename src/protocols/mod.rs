//! Upstream forwarding.

pub mod proxy;

pub use proxy::{Forwarder, UpstreamRegistry, UpstreamTarget, USER_ID_HEADER, USER_ROLE_HEADER};
