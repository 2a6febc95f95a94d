//! Pending request table for the tagged discipline.
//!
//! Maps correlation ids to the completion slot of a waiting request. An
//! entry leaves the table exactly once: on a matching reply, on a channel
//! failure, on expiry, or when its waiter gives up.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::QueryType;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Completion slot handed to the waiter
pub type Completion = oneshot::Receiver<GatewayResult<serde_json::Value>>;

/// A request waiting for its reply
struct PendingRequest {
    /// Channel to send the outcome
    sender: oneshot::Sender<GatewayResult<serde_json::Value>>,
    /// When the request was registered
    created_at: Instant,
    /// Query type, checked against the echoed `queryType`
    query_type: QueryType,
}

/// Result of routing a reply to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The waiter received the outcome
    Delivered,
    /// The id was registered but its waiter had already gone
    Abandoned,
    /// No pending request with that id
    Unknown,
}

/// Pending request table.
///
/// Flow:
/// 1. The correlator calls `register()` with the envelope's id
/// 2. The frame is handed to the channel
/// 3. The response listener calls `complete()` when the echoed id arrives
/// 4. The waiter awaits the receiver until the deadline, then `expire()`s
#[derive(Default)]
pub struct PendingRequestStore {
    /// Map of correlation id to pending request
    pending: DashMap<CorrelationId, PendingRequest>,
}

impl PendingRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and get the receiver for its outcome.
    ///
    /// Returns `None` if the id is already pending; ids are never reused.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        query_type: QueryType,
        timeout: Duration,
    ) -> Option<(Completion, Instant)> {
        match self.pending.entry(correlation_id) {
            Entry::Occupied(_) => {
                warn!(correlation_id = %correlation_id, "Correlation id already pending");
                None
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let created_at = Instant::now();
                let deadline = created_at + timeout;
                slot.insert(PendingRequest {
                    sender: tx,
                    created_at,
                    query_type,
                });

                debug!(
                    correlation_id = %correlation_id,
                    query_type = %query_type,
                    "Registered pending request"
                );
                Some((rx, deadline))
            }
        }
    }

    /// Resolve a pending request with its outcome.
    pub fn complete(
        &self,
        correlation_id: CorrelationId,
        result: GatewayResult<serde_json::Value>,
    ) -> Delivery {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            return Delivery::Unknown;
        };

        let elapsed = pending.created_at.elapsed();
        match pending.sender.send(result) {
            Ok(()) => {
                debug!(
                    correlation_id = %correlation_id,
                    query_type = %pending.query_type,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Completed pending request"
                );
                Delivery::Delivered
            }
            Err(_) => {
                debug!(
                    correlation_id = %correlation_id,
                    "Pending request receiver dropped"
                );
                Delivery::Abandoned
            }
        }
    }

    /// Fail every pending request with the same error.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self, error: GatewayError) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;

        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(error.clone()));
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(failed = failed, error = %error, "Failed all pending requests");
        }
        failed
    }

    /// Drop a request whose waiter hit its deadline.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            warn!(correlation_id = %correlation_id, "Pending request timed out");
            true
        } else {
            false
        }
    }

    /// Drop a request whose waiter went away before resolution.
    pub fn abandon(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            debug!(correlation_id = %correlation_id, "Pending request abandoned");
            true
        } else {
            false
        }
    }

    /// Query type a pending request was sent with
    pub fn query_type_of(&self, correlation_id: &CorrelationId) -> Option<QueryType> {
        self.pending.get(correlation_id).map(|entry| entry.query_type)
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
