//! Domain types for the route gateway.
//!
//! This module contains the core types, configuration, and error handling.

pub mod config;
pub mod correlation;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use config::{
    BackendAddress, BackendConfig, BackendMode, BackoffConfig, ConfigError,
    CorrelationDiscipline, GatewayConfig, OutputMode, ProcessConfig,
};
pub use correlation::CorrelationId;
pub use error::{ErrorBody, GatewayError, GatewayResult};
pub use types::*;
