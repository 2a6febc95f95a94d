//! Correlation layer.
//!
//! Matches every request written to the shared channel with the reply that
//! answers it, or synthesizes a failure. Two disciplines are available:
//!
//! - [`tagged`]: the engine echoes an `id`; requests run concurrently and
//!   replies are routed through the pending table.
//! - [`sequential`]: no id on the wire; one request in flight, FIFO.
//!
//! Either way the caller gets a [`PendingHandle`] to await. Dropping the
//! handle abandons the request and its eventual outcome is discarded.

pub mod pending;
pub mod sequential;
pub mod tagged;

pub use pending::{Delivery, PendingRequestStore};
pub use sequential::Sequencer;
pub use tagged::TaggedCorrelator;

use crate::channel::{BackendChannel, Connector};
use crate::domain::config::{BackendConfig, CorrelationDiscipline};
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{ChannelState, RequestEnvelope};
use crate::middleware::metrics::GatewayMetrics;
use crate::ports::outbound::{BackendStatus, RouteBackend};
use async_trait::async_trait;
use pending::Completion;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// A submitted request awaiting its outcome.
pub struct PendingHandle {
    id: CorrelationId,
    deadline: Instant,
    timeout: Duration,
    completion: Completion,
    /// Set under the tagged discipline so an expired or dropped handle can
    /// remove its table entry
    store: Option<Arc<PendingRequestStore>>,
    settled: bool,
}

impl PendingHandle {
    pub(crate) fn new(
        id: CorrelationId,
        deadline: Instant,
        timeout: Duration,
        completion: Completion,
        store: Option<Arc<PendingRequestStore>>,
    ) -> Self {
        Self {
            id,
            deadline,
            timeout,
            completion,
            store,
            settled: false,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait for the reply, a failure, or the deadline.
    pub async fn wait(mut self) -> GatewayResult<serde_json::Value> {
        let outcome = timeout_at(self.deadline, &mut self.completion).await;
        self.settled = true;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::unavailable(
                "request dropped before completion",
            )),
            Err(_) => {
                if let Some(store) = &self.store {
                    store.expire(&self.id);
                }
                Err(GatewayError::Timeout(self.timeout))
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(store) = &self.store {
            store.abandon(&self.id);
        }
    }
}

enum Discipline {
    Tagged(TaggedCorrelator),
    Sequential(Sequencer),
}

/// Shared-channel backend: one channel actor plus one correlation discipline.
pub struct Correlator {
    discipline: Discipline,
    channel: BackendChannel,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl Correlator {
    /// Spawn the channel actor and the discipline's listener task.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: &BackendConfig,
        request_timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        info!(
            backend = %connector.describe(),
            discipline = ?config.discipline,
            "Starting backend channel"
        );
        let (channel, inbound) = BackendChannel::spawn(connector, config);

        let discipline = match config.discipline {
            CorrelationDiscipline::Tagged => {
                Discipline::Tagged(TaggedCorrelator::start(channel.clone(), inbound, metrics))
            }
            CorrelationDiscipline::Sequential => Discipline::Sequential(Sequencer::start(
                channel.clone(),
                inbound,
                config.queue_capacity,
                metrics,
            )),
        };

        Self {
            discipline,
            channel,
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Hand a request to the channel and return immediately.
    pub fn submit(&self, envelope: RequestEnvelope) -> GatewayResult<PendingHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::unavailable("gateway shutting down"));
        }

        debug!(
            correlation_id = %envelope.id(),
            query_type = %envelope.query_type(),
            "Submitting request"
        );
        match &self.discipline {
            Discipline::Tagged(tagged) => tagged.submit(envelope, self.request_timeout),
            Discipline::Sequential(sequencer) => sequencer.submit(envelope, self.request_timeout),
        }
    }

    pub fn discipline(&self) -> CorrelationDiscipline {
        match self.discipline {
            Discipline::Tagged(_) => CorrelationDiscipline::Tagged,
            Discipline::Sequential(_) => CorrelationDiscipline::Sequential,
        }
    }

    pub fn pending_count(&self) -> usize {
        match &self.discipline {
            Discipline::Tagged(tagged) => tagged.pending_count(),
            Discipline::Sequential(sequencer) => sequencer.pending_count(),
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Reject new submissions, give in-flight requests up to `grace` to
    /// finish, fail the rest and close the channel.
    pub async fn drain(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            pending = self.pending_count(),
            grace_ms = grace.as_millis() as u64,
            "Draining backend channel"
        );
        self.channel.begin_drain().await;

        let deadline = Instant::now() + grace;
        while self.pending_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let remaining = self.pending_count();
        if remaining > 0 {
            warn!(remaining = remaining, "Grace period over, failing pending requests");
        }
        if let Discipline::Tagged(tagged) = &self.discipline {
            tagged.fail_all(GatewayError::unavailable("gateway shutting down"));
        }
        self.channel.close().await;
    }
}

#[async_trait]
impl RouteBackend for Correlator {
    async fn execute(&self, envelope: RequestEnvelope) -> GatewayResult<serde_json::Value> {
        self.submit(envelope)?.wait().await
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            mode: "socket",
            channel: Some(self.channel_state()),
            pending: self.pending_count(),
        }
    }

    async fn shutdown(&self, grace: Duration) {
        self.drain(grace).await;
    }
}
