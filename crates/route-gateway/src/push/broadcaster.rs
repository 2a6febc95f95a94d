//! Fan-out list of passive map-update listeners.

use crate::domain::correlation::CorrelationId;
use crate::domain::types::QueryType;
use crate::middleware::metrics::GatewayMetrics;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pushed to every listener after a route is computed
#[derive(Debug, Clone, Serialize)]
pub struct RouteUpdate<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "queryType")]
    pub query_type: QueryType,
    pub geometry: &'a serde_json::Value,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Listeners whose buffer was full
    pub dropped: usize,
    /// Listeners found closed and removed
    pub pruned: usize,
}

pub struct RouteBroadcaster {
    listeners: DashMap<CorrelationId, mpsc::Sender<String>>,
    /// Updates buffered per listener
    buffer: usize,
    metrics: Arc<GatewayMetrics>,
}

impl RouteBroadcaster {
    pub fn new(buffer: usize, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            listeners: DashMap::new(),
            buffer: buffer.max(1),
            metrics,
        }
    }

    /// Add a listener and get the stream of serialized updates for it.
    pub fn register(&self) -> (CorrelationId, mpsc::Receiver<String>) {
        let id = CorrelationId::new();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.listeners.insert(id, tx);
        self.metrics.record_listener_joined();
        debug!(listener_id = %id, listeners = self.listeners.len(), "Map listener registered");
        (id, rx)
    }

    pub fn unregister(&self, id: &CorrelationId) {
        if self.listeners.remove(id).is_some() {
            self.metrics.record_listener_left();
            debug!(listener_id = %id, "Map listener removed");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Drop every listener's sender so their sessions end.
    pub fn close_all(&self) {
        let closed = self.listeners.len();
        self.listeners.clear();
        for _ in 0..closed {
            self.metrics.record_listener_left();
        }
        if closed > 0 {
            debug!(listeners = closed, "Closed all map listeners");
        }
    }

    /// Send a computed route to every listener without waiting on any of
    /// them.
    pub fn publish(&self, query_type: QueryType, geometry: &serde_json::Value) -> PublishReport {
        let mut report = PublishReport::default();
        if self.listeners.is_empty() {
            return report;
        }

        let update = RouteUpdate {
            kind: "route",
            query_type,
            geometry,
        };
        let text = match serde_json::to_string(&update) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Cannot serialize map update");
                return report;
            }
        };

        self.listeners.retain(|id, listener| match listener.try_send(text.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(listener_id = %id, "Map listener is behind, dropping update");
                report.dropped += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                report.pruned += 1;
                false
            }
        });

        for _ in 0..report.pruned {
            self.metrics.record_listener_left();
        }
        self.metrics.record_broadcast(report.dropped);
        debug!(
            query_type = %query_type,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "Map update published"
        );
        report
    }
}
