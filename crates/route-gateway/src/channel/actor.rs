//! Backend channel actor.
//!
//! One task owns the connection to the engine. Submitters talk to it through
//! a bounded command queue; everything the engine sends comes back on the
//! inbound stream returned by [`BackendChannel::spawn`]. The task is the
//! only writer of [`ChannelState`].
//!
//! ```text
//!   Disconnected ──first use──▶ Connecting ──ok──▶ Connected
//!        ▲                          │                  │
//!        └──── backoff ◀── failure ─┴──── lost ────────┤
//!        ▲                                             │ drain
//!        └──────────────── close ◀──── Draining ◀──────┘
//! ```
//!
//! The backoff only starts over once a session proves healthy: it delivered
//! a message or stayed up for [`STABLE_SESSION`]. An engine that accepts and
//! immediately hangs up is retried with growing delays.

use super::backoff::Backoff;
use super::connector::{BoxedStream, Connector};
use super::frame::{read_frame, write_frame, Frame, ReadError};
use crate::domain::config::BackendConfig;
use crate::domain::error::GatewayError;
use crate::domain::types::ChannelState;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Uptime after which a silent session still counts as healthy
pub const STABLE_SESSION: Duration = Duration::from_secs(5);

/// Transport-level channel failures
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("cannot connect to {target}: {reason}")]
    Connect { target: String, reason: String },
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),
    #[error("connection closed by backend")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("inbound frame exceeds {0} bytes")]
    FrameTooLarge(usize),
    #[error("submission queue is full")]
    QueueFull,
    #[error("backend channel has shut down")]
    Shutdown,
    #[error("connection reset after an unanswered request")]
    Reset,
}

impl From<ChannelError> for GatewayError {
    fn from(err: ChannelError) -> Self {
        GatewayError::ChannelUnavailable(err.to_string())
    }
}

impl From<ReadError> for ChannelError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Io(e) => ChannelError::Io(e),
            ReadError::TooLarge(max) => ChannelError::FrameTooLarge(max),
        }
    }
}

/// Events delivered to the correlation layer.
#[derive(Debug)]
pub enum Inbound {
    /// A connection was established
    Connected,
    /// A well-formed JSON line from the engine
    Message(serde_json::Value),
    /// A line that is not valid JSON
    Malformed { raw: String, error: String },
    /// The connection was lost or could not be opened. Every frame submitted
    /// with an epoch below `epoch` has been discarded.
    Disconnected { epoch: u64, reason: String },
}

enum Command {
    Send(Frame),
    /// Reset the connection of the given epoch
    Reset(u64),
    Drain,
    Close(oneshot::Sender<()>),
}

/// Handle to the channel actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BackendChannel {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ChannelState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send(frame) => write!(f, "Send({})", frame.id),
            Command::Reset(epoch) => write!(f, "Reset({})", epoch),
            Command::Drain => write!(f, "Drain"),
            Command::Close(_) => write!(f, "Close"),
        }
    }
}

impl BackendChannel {
    /// Start the actor. It stays `Disconnected` until the first frame is
    /// submitted.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        config: &BackendConfig,
    ) -> (Self, mpsc::Receiver<Inbound>) {
        let (commands_tx, commands_rx) = mpsc::channel(config.queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity);
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);

        let actor = ChannelActor {
            connector,
            commands: commands_rx,
            inbound: inbound_tx,
            state: state_tx,
            queue: VecDeque::new(),
            backoff: Backoff::new(&config.backoff),
            connect_timeout: config.connect_timeout,
            max_frame_len: config.max_frame_len,
            epoch: 0,
            draining: false,
        };
        tokio::spawn(actor.run());

        (
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            inbound_rx,
        )
    }

    /// Enqueue a frame without waiting for it to be written.
    pub fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        self.commands.try_send(Command::Send(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Shutdown,
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Abandon the connection of `epoch` and open a fresh one. Anything the
    /// engine still sends on the old socket is never delivered. Completion is
    /// observable as an `Inbound::Disconnected` event with a later epoch; if
    /// that connection is already gone, the event has been emitted before.
    pub async fn reset(&self, epoch: u64) -> Result<(), ChannelError> {
        self.commands
            .send(Command::Reset(epoch))
            .await
            .map_err(|_| ChannelError::Shutdown)
    }

    /// Enter `Draining`: no reconnects, in-flight replies still delivered.
    pub async fn begin_drain(&self) {
        let _ = self.commands.send(Command::Drain).await;
    }

    /// Close the connection and stop the actor.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Close(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

/// How a connected session ended
enum SessionEnd {
    Lost(ChannelError),
    Reset,
    Closed,
}

struct ChannelActor {
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Sender<Inbound>,
    state: watch::Sender<ChannelState>,
    /// Frames received while not connected, flushed in order on connect
    queue: VecDeque<Frame>,
    backoff: Backoff,
    connect_timeout: Duration,
    max_frame_len: usize,
    epoch: u64,
    draining: bool,
}

impl ChannelActor {
    async fn run(mut self) {
        if !self.wait_for_first_use().await {
            return;
        }

        loop {
            if let Some(stream) = self.connect().await {
                let connected_at = Instant::now();
                let end = self.serve(stream).await;
                if connected_at.elapsed() >= STABLE_SESSION {
                    self.backoff.reset();
                }
                match end {
                    SessionEnd::Closed => return,
                    SessionEnd::Lost(err) => self.lose(err).await,
                    SessionEnd::Reset => {
                        self.lose(ChannelError::Reset).await;
                        if !self.draining {
                            continue;
                        }
                    }
                }
            }

            let delay = self.backoff.next_delay();
            warn!(
                backend = %self.connector.describe(),
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Backend unreachable, scheduling reconnect"
            );
            if !self.wait_retry(Instant::now() + delay).await {
                return;
            }
        }
    }

    /// Idle in `Disconnected` until a frame arrives. Returns false when the
    /// channel is closed first.
    async fn wait_for_first_use(&mut self) -> bool {
        while self.queue.is_empty() {
            match self.commands.recv().await {
                Some(command) => {
                    if !self.handle_offline(command).await {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// Wait out the backoff delay while queueing submissions. A draining
    /// channel never reconnects and only waits for `Close`.
    async fn wait_retry(&mut self, retry_at: Instant) -> bool {
        loop {
            tokio::select! {
                _ = sleep_until(retry_at), if !self.draining => return true,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_offline(command).await {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }
    }

    /// Apply a command while no connection is open. Returns false on close.
    async fn handle_offline(&mut self, command: Command) -> bool {
        match command {
            Command::Send(frame) => {
                if frame.epoch < self.epoch {
                    debug!(correlation_id = %frame.id, "Discarding frame from a failed connection");
                } else {
                    self.queue.push_back(frame);
                }
                true
            }
            Command::Reset(epoch) => {
                if epoch >= self.epoch {
                    self.lose(ChannelError::Reset).await;
                }
                true
            }
            Command::Drain => {
                self.draining = true;
                self.set_state(ChannelState::Draining);
                true
            }
            Command::Close(ack) => {
                self.queue.clear();
                self.set_state(ChannelState::Disconnected);
                let _ = ack.send(());
                false
            }
        }
    }

    async fn connect(&mut self) -> Option<BoxedStream> {
        self.set_state(ChannelState::Connecting);
        let target = self.connector.describe();
        debug!(backend = %target, "Connecting to backend");

        match timeout(self.connect_timeout, self.connector.connect()).await {
            Ok(Ok(stream)) => {
                info!(backend = %target, queued = self.queue.len(), "Backend connected");
                self.set_state(ChannelState::Connected);
                let _ = self.inbound.send(Inbound::Connected).await;
                Some(stream)
            }
            Ok(Err(e)) => {
                self.lose(ChannelError::Connect {
                    target,
                    reason: e.to_string(),
                })
                .await;
                None
            }
            Err(_) => {
                self.lose(ChannelError::ConnectTimeout(target)).await;
                None
            }
        }
    }

    /// Drop everything tied to the failed connection and tell the
    /// correlation layer to fail what it is waiting for.
    async fn lose(&mut self, err: ChannelError) {
        self.epoch += 1;
        let discarded = self.queue.len();
        self.queue.clear();
        self.set_state(if self.draining {
            ChannelState::Draining
        } else {
            ChannelState::Disconnected
        });

        warn!(
            backend = %self.connector.describe(),
            error = %err,
            discarded = discarded,
            epoch = self.epoch,
            "Backend channel failed"
        );

        let _ = self
            .inbound
            .send(Inbound::Disconnected {
                epoch: self.epoch,
                reason: err.to_string(),
            })
            .await;
    }

    async fn serve(&mut self, stream: BoxedStream) -> SessionEnd {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        while let Some(frame) = self.queue.pop_front() {
            if let Err(e) = self.write(&mut writer, &frame).await {
                return SessionEnd::Lost(e);
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = self.write(&mut writer, &frame).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    Some(Command::Reset(epoch)) if epoch >= self.epoch => {
                        let _ = writer.shutdown().await;
                        return SessionEnd::Reset;
                    }
                    Some(Command::Reset(_)) => {}
                    Some(Command::Drain) => {
                        info!("Backend channel draining");
                        self.draining = true;
                        self.set_state(ChannelState::Draining);
                    }
                    Some(Command::Close(ack)) => {
                        let _ = writer.shutdown().await;
                        self.set_state(ChannelState::Disconnected);
                        info!("Backend channel closed");
                        let _ = ack.send(());
                        return SessionEnd::Closed;
                    }
                    None => {
                        let _ = writer.shutdown().await;
                        self.set_state(ChannelState::Disconnected);
                        return SessionEnd::Closed;
                    }
                },
                read = read_frame(&mut reader, &mut buf, self.max_frame_len) => match read {
                    Ok(Some(line)) => {
                        self.backoff.reset();
                        self.deliver(line).await
                    }
                    Ok(None) => return SessionEnd::Lost(ChannelError::Closed),
                    Err(e) => return SessionEnd::Lost(e.into()),
                },
            }
        }
    }

    async fn write<W>(&self, writer: &mut W, frame: &Frame) -> Result<(), ChannelError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        if frame.epoch < self.epoch {
            debug!(correlation_id = %frame.id, "Discarding frame from a failed connection");
            return Ok(());
        }
        if Instant::now() >= frame.deadline {
            debug!(correlation_id = %frame.id, "Discarding frame past its deadline");
            return Ok(());
        }
        write_frame(writer, &frame.line).await?;
        debug!(correlation_id = %frame.id, bytes = frame.line.len(), "Frame written");
        Ok(())
    }

    async fn deliver(&self, line: Vec<u8>) {
        let event = match serde_json::from_slice(&line) {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Malformed {
                raw: String::from_utf8_lossy(&line).into_owned(),
                error: e.to_string(),
            },
        };
        if self.inbound.send(event).await.is_err() {
            debug!("Inbound consumer gone, dropping backend message");
        }
    }

    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = %current, to = %next, "Channel state transition");
                *current = next;
                true
            }
        });
    }
}
