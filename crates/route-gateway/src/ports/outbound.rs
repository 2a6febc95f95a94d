//! Outbound ports for the route gateway.

use crate::domain::error::GatewayResult;
use crate::domain::types::{ChannelState, RequestEnvelope};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Snapshot of a backend adapter for `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    /// "socket" or "process"
    pub mode: &'static str,
    /// Channel state; `None` for adapters without a persistent channel
    pub channel: Option<ChannelState>,
    /// Requests submitted but not yet resolved
    pub pending: usize,
}

impl BackendStatus {
    /// Whether the adapter can currently reach the engine.
    pub fn is_healthy(&self) -> bool {
        match self.channel {
            Some(state) => state == ChannelState::Connected,
            None => true,
        }
    }
}

/// Something that can answer engine queries.
///
/// The socket deployment implements this with the correlation layer over a
/// shared channel; the process deployment spawns one engine run per request.
#[async_trait]
pub trait RouteBackend: Send + Sync {
    /// Execute one request and return the raw engine reply.
    async fn execute(&self, envelope: RequestEnvelope) -> GatewayResult<serde_json::Value>;

    /// Current status
    fn status(&self) -> BackendStatus;

    /// Stop accepting requests, let in-flight ones finish within `grace`,
    /// then fail the rest.
    async fn shutdown(&self, grace: Duration);
}
