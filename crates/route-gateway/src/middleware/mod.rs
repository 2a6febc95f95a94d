//! HTTP middleware and request accounting.
//!
//! Layer order: Request → Trace → CORS → BodyLimit → Handler

pub mod cors;
pub mod metrics;

pub use cors::create_cors_layer;
pub use metrics::GatewayMetrics;
