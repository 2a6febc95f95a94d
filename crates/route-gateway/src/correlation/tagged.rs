//! Tagged discipline: every frame carries the correlation id and the engine
//! echoes it, so any number of requests may be in flight at once.

use super::pending::{Delivery, PendingRequestStore};
use super::PendingHandle;
use crate::channel::{BackendChannel, Frame, Inbound};
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{echoed_query_type, RequestEnvelope};
use crate::middleware::metrics::GatewayMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct TaggedCorrelator {
    pending: Arc<PendingRequestStore>,
    channel: BackendChannel,
    /// Last connection epoch the listener has processed
    epoch: Arc<AtomicU64>,
}

impl TaggedCorrelator {
    /// Start the response listener on the channel's inbound stream.
    pub fn start(
        channel: BackendChannel,
        inbound: mpsc::Receiver<Inbound>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let pending = Arc::new(PendingRequestStore::new());
        let epoch = Arc::new(AtomicU64::new(0));

        let listener = ResponseListener {
            pending: Arc::clone(&pending),
            inbound,
            epoch: Arc::clone(&epoch),
            metrics,
        };
        tokio::spawn(listener.run());

        Self {
            pending,
            channel,
            epoch,
        }
    }

    /// Register the request, then hand its frame to the channel.
    pub fn submit(
        &self,
        envelope: RequestEnvelope,
        timeout: Duration,
    ) -> GatewayResult<PendingHandle> {
        let id = envelope.id();
        let line = serde_json::to_vec(&envelope.to_wire(true))
            .map_err(|e| GatewayError::protocol(format!("cannot encode request: {}", e)))?;

        let (completion, deadline) = self
            .pending
            .register(id, envelope.query_type(), timeout)
            .ok_or_else(|| GatewayError::protocol(format!("correlation id {} reused", id)))?;

        // Read after registering: a disconnect processed in between fails
        // this request, so its frame may be dropped with the old epoch.
        let epoch = self.epoch.load(Ordering::SeqCst);

        let frame = Frame {
            id,
            epoch,
            deadline,
            line,
        };
        if let Err(e) = self.channel.send(frame) {
            self.pending.abandon(&id);
            return Err(e.into());
        }

        Ok(PendingHandle::new(
            id,
            deadline,
            timeout,
            completion,
            Some(Arc::clone(&self.pending)),
        ))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn fail_all(&self, error: GatewayError) -> usize {
        self.pending.fail_all(error)
    }
}

/// Routes inbound messages to pending requests by their echoed id.
struct ResponseListener {
    pending: Arc<PendingRequestStore>,
    inbound: mpsc::Receiver<Inbound>,
    epoch: Arc<AtomicU64>,
    metrics: Arc<GatewayMetrics>,
}

impl ResponseListener {
    async fn run(mut self) {
        while let Some(event) = self.inbound.recv().await {
            match event {
                Inbound::Connected => self.metrics.record_connect(),
                Inbound::Message(reply) => self.handle_reply(reply),
                Inbound::Malformed { raw, error } => {
                    // Without a parsable id there is nobody to blame
                    warn!(error = %error, raw = %truncate(&raw), "Discarding malformed backend line");
                    self.metrics.record_stale_reply();
                }
                Inbound::Disconnected { epoch, reason } => {
                    // Publish the epoch first so that anything registered
                    // after `fail_all` sends with the new epoch.
                    self.epoch.store(epoch, Ordering::SeqCst);
                    self.metrics.record_disconnect();
                    self.pending.fail_all(GatewayError::unavailable(reason));
                }
            }
        }

        debug!("Backend channel stopped, stopping response listener");
        self.pending
            .fail_all(GatewayError::unavailable("backend channel closed"));
    }

    fn handle_reply(&self, mut reply: serde_json::Value) {
        let id = reply
            .get("id")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| CorrelationId::parse(s).ok());

        let Some(id) = id else {
            warn!("Discarding backend reply without a correlation id");
            self.metrics.record_stale_reply();
            return;
        };

        let Some(expected) = self.pending.query_type_of(&id) else {
            warn!(correlation_id = %id, "Reply for unknown or expired correlation id");
            self.metrics.record_stale_reply();
            return;
        };

        if let Some(object) = reply.as_object_mut() {
            object.remove("id");
        }

        let outcome = match echoed_query_type(&reply) {
            Some(Some(echoed)) if echoed != expected => Err(GatewayError::protocol(format!(
                "expected queryType \"{}\", got \"{}\"",
                expected, echoed
            ))),
            Some(None) => Err(GatewayError::protocol("unrecognised queryType in reply")),
            _ => Ok(reply),
        };

        if self.pending.complete(id, outcome) == Delivery::Unknown {
            // Expired between the lookup and now
            self.metrics.record_stale_reply();
        }
    }
}

fn truncate(raw: &str) -> &str {
    match raw.char_indices().nth(120) {
        Some((at, _)) => &raw[..at],
        None => raw,
    }
}
