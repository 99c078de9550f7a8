pub mod pipeline;
pub mod server;

pub use pipeline::{ErrorReporter, GatewayPipeline};
pub use server::{GatewayServer, ServerState};
