//! Gateway counters, exported as JSON at `/metrics`.

use crate::domain::error::GatewayError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Route gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,

    // Failures by kind
    pub validation_rejected: AtomicU64,
    pub channel_failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub backend_errors: AtomicU64,
    pub protocol_errors: AtomicU64,

    // Channel lifecycle
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub stale_replies: AtomicU64,

    // Push listeners
    pub push_listeners: AtomicU64,
    pub push_broadcasts: AtomicU64,
    pub push_dropped: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished HTTP operation
    pub fn record_request(&self, outcome: Result<(), &GatewayError>, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                self.requests_success.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.requests_error.fetch_add(1, Ordering::Relaxed);
                let counter = match e {
                    GatewayError::Validation(_) => &self.validation_rejected,
                    GatewayError::ChannelUnavailable(_) => &self.channel_failures,
                    GatewayError::Timeout(_) => &self.timeouts,
                    GatewayError::Backend(_) => &self.backend_errors,
                    GatewayError::Protocol(_) => &self.protocol_errors,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// A reply that matched no pending request
    pub fn record_stale_reply(&self) {
        self.stale_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_joined(&self) {
        self.push_listeners.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_left(&self) {
        self.push_listeners.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, dropped: usize) {
        self.push_broadcasts.fetch_add(1, Ordering::Relaxed);
        self.push_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
            },
            "errors": {
                "validation": self.validation_rejected.load(Ordering::Relaxed),
                "channel_unavailable": self.channel_failures.load(Ordering::Relaxed),
                "timeout": self.timeouts.load(Ordering::Relaxed),
                "backend": self.backend_errors.load(Ordering::Relaxed),
                "protocol": self.protocol_errors.load(Ordering::Relaxed),
            },
            "channel": {
                "connects": self.connects.load(Ordering::Relaxed),
                "disconnects": self.disconnects.load(Ordering::Relaxed),
                "stale_replies": self.stale_replies.load(Ordering::Relaxed),
            },
            "push": {
                "listeners": self.push_listeners.load(Ordering::Relaxed),
                "broadcasts": self.push_broadcasts.load(Ordering::Relaxed),
                "dropped": self.push_dropped.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}
