//! CORS middleware.
//!
//! Wrapper around tower-http CORS with gateway configuration.

use crate::domain::config::CorsConfig;
use axum::http::{HeaderName, Method};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Create CORS layer from gateway config
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        // No CORS headers at all: browsers fall back to same-origin
        return CorsLayer::new();
    }

    let mut cors = CorsLayer::new();

    if config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    cors = cors.allow_methods(methods);

    if config.allowed_headers.iter().any(|h| h == "*") {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Vec<HeaderName> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    cors.max_age(Duration::from_secs(config.max_age))
}
