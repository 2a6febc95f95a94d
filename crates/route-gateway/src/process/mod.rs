//! Process-handoff backend.
//!
//! Each request runs the engine once with the query as positional
//! arguments. The result comes back on stdout, in a per-request file named
//! by correlation id, or in one shared file whose use is serialized.

mod invocation;

pub use invocation::query_args;

use crate::domain::config::{OutputMode, ProcessConfig};
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::RequestEnvelope;
use crate::ports::outbound::{BackendStatus, RouteBackend};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Output;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct ProcessBackend {
    config: ProcessConfig,
    request_timeout: Duration,
    /// Held from spawn to read in shared-file mode
    shared_output: Mutex<()>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

/// Decrements the in-flight count however the request ends
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProcessBackend {
    pub fn new(config: ProcessConfig, request_timeout: Duration) -> Self {
        info!(
            program = %config.program.display(),
            output = ?config.output,
            "Using process backend"
        );
        Self {
            config,
            request_timeout,
            shared_output: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    async fn run(&self, envelope: &RequestEnvelope) -> GatewayResult<serde_json::Value> {
        let mut args = self.config.args.clone();
        args.extend(query_args(envelope));

        match &self.config.output {
            OutputMode::Stdout => {
                let output = self.invoke(&args).await?;
                parse_output(&output.stdout)
            }
            OutputMode::Shared { path } => {
                let _exclusive = self.shared_output.lock().await;
                remove_stale(path).await?;
                self.invoke(&args).await?;
                read_output(path).await
            }
            OutputMode::PerRequest { dir } => {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    GatewayError::unavailable(format!("cannot create {}: {}", dir.display(), e))
                })?;
                let path = dir.join(format!("{}.json", envelope.id()));
                args.push(path.to_string_lossy().into_owned());

                let result = match self.invoke(&args).await {
                    Ok(_) => read_output(&path).await,
                    Err(e) => Err(e),
                };
                let _ = tokio::fs::remove_file(&path).await;
                result
            }
        }
    }

    /// Run the engine to completion. Nonzero exit is a backend failure and
    /// the output is not looked at.
    async fn invoke(&self, args: &[String]) -> GatewayResult<Output> {
        let mut command = Command::new(&self.config.program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let output = command.output().await.map_err(|e| {
            GatewayError::unavailable(format!(
                "cannot run {}: {}",
                self.config.program.display(),
                e
            ))
        })?;

        debug!(
            status = %output.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Engine process exited"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.trim();
            return Err(GatewayError::Backend(if reason.is_empty() {
                format!("engine exited with {}", output.status)
            } else {
                reason.to_string()
            }));
        }
        Ok(output)
    }
}

async fn remove_stale(path: &Path) -> GatewayResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GatewayError::unavailable(format!(
            "cannot clear {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn read_output(path: &Path) -> GatewayResult<serde_json::Value> {
    match tokio::fs::read(path).await {
        Ok(bytes) => parse_output(&bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(GatewayError::Backend(format!(
            "engine produced no output at {}",
            path.display()
        ))),
        Err(e) => Err(GatewayError::Backend(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_output(bytes: &[u8]) -> GatewayResult<serde_json::Value> {
    serde_json::from_slice(bytes).map_err(|e| GatewayError::protocol(e.to_string()))
}

#[async_trait]
impl RouteBackend for ProcessBackend {
    async fn execute(&self, envelope: RequestEnvelope) -> GatewayResult<serde_json::Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::unavailable("gateway shutting down"));
        }
        let _in_flight = InFlight::enter(&self.in_flight);

        // Dropping the run future kills the child
        match tokio::time::timeout(self.request_timeout, self.run(&envelope)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    correlation_id = %envelope.id(),
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Engine process killed after deadline"
                );
                Err(GatewayError::Timeout(self.request_timeout))
            }
        }
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            mode: "process",
            channel: None,
            pending: self.in_flight.load(Ordering::SeqCst),
        }
    }

    async fn shutdown(&self, grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.in_flight.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(remaining = remaining, "Engine processes still running at shutdown");
        }
    }
}
