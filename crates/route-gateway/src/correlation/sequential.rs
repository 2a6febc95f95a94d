//! Sequential discipline for engines that do not echo correlation ids.
//!
//! A single task owns the submission queue and lets at most one request be
//! in flight on the channel. The next request is written only after the
//! previous one got its reply, timed out or was failed by the channel, so
//! replies are matched purely by order. Requests are served FIFO.
//!
//! A request that times out leaves the engine's answer owed on the wire, so
//! the connection is reset before the next request is written. The late
//! reply dies with the old socket instead of being read as the next answer.

use super::PendingHandle;
use crate::channel::{BackendChannel, ChannelError, Frame, Inbound};
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{echoed_query_type, QueryType, RequestEnvelope};
use crate::middleware::metrics::GatewayMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

type Reply = oneshot::Sender<GatewayResult<serde_json::Value>>;

struct Submission {
    envelope: RequestEnvelope,
    deadline: Instant,
    timeout: Duration,
    reply: Reply,
}

/// Submission side of the sequencer
pub struct Sequencer {
    submissions: mpsc::Sender<Submission>,
    /// Queued plus in-flight requests
    pending: Arc<AtomicUsize>,
}

impl Sequencer {
    /// Start the sequencer task on the channel's inbound stream.
    pub fn start(
        channel: BackendChannel,
        inbound: mpsc::Receiver<Inbound>,
        capacity: usize,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let (submissions_tx, submissions_rx) = mpsc::channel(capacity);
        let pending = Arc::new(AtomicUsize::new(0));

        let task = SequencerTask {
            channel,
            submissions: submissions_rx,
            inbound,
            inbound_open: true,
            epoch: 0,
            pending: Arc::clone(&pending),
            metrics,
        };
        tokio::spawn(task.run());

        Self {
            submissions: submissions_tx,
            pending,
        }
    }

    /// Queue a request. Never waits for the channel.
    pub fn submit(
        &self,
        envelope: RequestEnvelope,
        timeout: Duration,
    ) -> GatewayResult<PendingHandle> {
        let id = envelope.id();
        let deadline = Instant::now() + timeout;
        let (reply, completion) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::SeqCst);
        let submission = Submission {
            envelope,
            deadline,
            timeout,
            reply,
        };
        if let Err(e) = self.submissions.try_send(submission) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            let err = match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ChannelError::Shutdown,
            };
            return Err(err.into());
        }

        Ok(PendingHandle::new(id, deadline, timeout, completion, None))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct SequencerTask {
    channel: BackendChannel,
    submissions: mpsc::Receiver<Submission>,
    inbound: mpsc::Receiver<Inbound>,
    inbound_open: bool,
    /// Last connection epoch seen on the inbound stream
    epoch: u64,
    pending: Arc<AtomicUsize>,
    metrics: Arc<GatewayMetrics>,
}

impl SequencerTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = self.inbound.recv(), if self.inbound_open => match event {
                    Some(event) => self.on_idle_event(event),
                    None => {
                        debug!("Backend channel stopped");
                        self.inbound_open = false;
                    }
                },
                submission = self.submissions.recv() => match submission {
                    Some(submission) => self.dispatch(submission).await,
                    None => return,
                },
            }
        }
    }

    /// Inbound traffic while nothing is in flight.
    fn on_idle_event(&mut self, event: Inbound) {
        match event {
            Inbound::Connected => self.metrics.record_connect(),
            Inbound::Message(_) => {
                warn!("Discarding backend reply with no request in flight");
                self.metrics.record_stale_reply();
            }
            Inbound::Malformed { error, .. } => {
                warn!(error = %error, "Discarding malformed backend line with no request in flight");
                self.metrics.record_stale_reply();
            }
            Inbound::Disconnected { epoch, reason } => {
                self.epoch = epoch;
                self.metrics.record_disconnect();
                self.fail_queued(&reason);
            }
        }
    }

    async fn dispatch(&mut self, submission: Submission) {
        let Submission {
            envelope,
            deadline,
            timeout,
            reply,
        } = submission;
        let id = envelope.id();
        let query_type = envelope.query_type();

        if reply.is_closed() {
            debug!(correlation_id = %id, "Skipping abandoned request");
            self.finish(id, reply, Err(GatewayError::unavailable("abandoned")));
            return;
        }
        if !self.inbound_open {
            self.finish(id, reply, Err(ChannelError::Shutdown.into()));
            return;
        }
        if Instant::now() >= deadline {
            warn!(correlation_id = %id, "Request expired while queued");
            self.finish(id, reply, Err(GatewayError::Timeout(timeout)));
            return;
        }

        let line = match serde_json::to_vec(&envelope.to_wire(false)) {
            Ok(line) => line,
            Err(e) => {
                let err = GatewayError::protocol(format!("cannot encode request: {}", e));
                self.finish(id, reply, Err(err));
                return;
            }
        };
        let frame = Frame {
            id,
            epoch: self.epoch,
            deadline,
            line,
        };
        if let Err(e) = self.channel.send(frame) {
            self.finish(id, reply, Err(e.into()));
            return;
        }
        debug!(correlation_id = %id, query_type = %query_type, "Request in flight");

        // An abandoned request still holds the slot until its reply or deadline
        let outcome = self.await_reply(id, query_type, deadline, timeout).await;
        let timed_out = matches!(outcome, Err(GatewayError::Timeout(_)));
        self.finish(id, reply, outcome);
        if timed_out {
            self.reset_channel().await;
        }
    }

    async fn await_reply(
        &mut self,
        id: CorrelationId,
        query_type: QueryType,
        deadline: Instant,
        timeout: Duration,
    ) -> GatewayResult<serde_json::Value> {
        let expiry = sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                _ = &mut expiry => {
                    warn!(
                        correlation_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "No reply before deadline, resetting connection"
                    );
                    return Err(GatewayError::Timeout(timeout));
                }
                event = self.inbound.recv() => match event {
                    None => {
                        self.inbound_open = false;
                        return Err(ChannelError::Shutdown.into());
                    }
                    Some(Inbound::Connected) => self.metrics.record_connect(),
                    Some(Inbound::Message(message)) => match echoed_query_type(&message) {
                        Some(Some(echoed)) if echoed != query_type => {
                            warn!(
                                correlation_id = %id,
                                expected = %query_type,
                                echoed = %echoed,
                                "Discarding stale reply"
                            );
                            self.metrics.record_stale_reply();
                        }
                        Some(None) => {
                            warn!(correlation_id = %id, "Discarding reply with unrecognised queryType");
                            self.metrics.record_stale_reply();
                        }
                        _ => return Ok(message),
                    },
                    Some(Inbound::Malformed { error, .. }) => {
                        return Err(GatewayError::protocol(error));
                    }
                    Some(Inbound::Disconnected { epoch, reason }) => {
                        self.epoch = epoch;
                        self.metrics.record_disconnect();
                        self.fail_queued(&reason);
                        return Err(GatewayError::unavailable(reason));
                    }
                },
            }
        }
    }

    /// Reset the connection and adopt its new epoch. Queued requests are kept
    /// and go out on the next connection.
    async fn reset_channel(&mut self) {
        let reset_epoch = self.epoch;
        if self.channel.reset(reset_epoch).await.is_err() {
            return;
        }
        loop {
            match self.inbound.recv().await {
                Some(Inbound::Disconnected { epoch, .. }) => {
                    self.epoch = epoch;
                    self.metrics.record_disconnect();
                    if epoch > reset_epoch {
                        return;
                    }
                }
                Some(Inbound::Connected) => self.metrics.record_connect(),
                Some(Inbound::Message(_)) | Some(Inbound::Malformed { .. }) => {
                    debug!("Discarding late reply to a timed-out request");
                    self.metrics.record_stale_reply();
                }
                None => {
                    self.inbound_open = false;
                    return;
                }
            }
        }
    }

    /// Fail everything waiting behind the current request.
    fn fail_queued(&mut self, reason: &str) {
        let mut failed = 0usize;
        while let Ok(submission) = self.submissions.try_recv() {
            let id = submission.envelope.id();
            self.finish(id, submission.reply, Err(GatewayError::unavailable(reason)));
            failed += 1;
        }
        if failed > 0 {
            warn!(failed = failed, reason = reason, "Failed queued requests");
        }
    }

    fn finish(&self, id: CorrelationId, reply: Reply, outcome: GatewayResult<serde_json::Value>) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if reply.send(outcome).is_err() {
            debug!(correlation_id = %id, "Waiter gone, discarding outcome");
        }
    }
}
