//! # Test Harness
//!
//! A scripted engine on a loopback TCP socket and a gateway launcher bound
//! to an ephemeral port. The engine speaks newline-delimited JSON and, by
//! default, answers every query with something derived from the request so
//! tests can tell replies apart.

use rand::Rng;
use route_gateway::{
    CorrelationDiscipline, GatewayConfig, GatewayMetrics, GatewayService, RouteBackend,
    ServiceError,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

// =============================================================================
// FAKE ENGINE
// =============================================================================

/// What the engine does with one request
pub enum Reply {
    Now(Value),
    After(Duration, Value),
    /// Never answer
    Silent,
    /// Close the connection instead of answering
    Hangup,
}

pub type Script = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

pub const PLACES: &[&str] = &["Main Library", "Law Library", "Gym", "North Gate"];

/// Reply a well-behaved engine would give.
pub fn answer(request: &Value) -> Value {
    match request["queryType"].as_str() {
        Some("path") | Some("ped_path") => {
            let from = request["startLocation"].as_str().unwrap_or_default();
            if from == "Nowhere" {
                return json!({"error": "Location not found: Nowhere"});
            }
            json!({
                "geometry": {
                    "type": "FeatureCollection",
                    "features": [],
                    "properties": {
                        "from": from,
                        "to": request["endLocation"],
                        "mode": request["queryType"],
                    }
                }
            })
        }
        Some("fuzzy") => {
            let needle = request["locationName"]
                .as_str()
                .unwrap_or_default()
                .to_lowercase();
            let candidates: Vec<&str> = PLACES
                .iter()
                .copied()
                .filter(|place| place.to_lowercase().contains(&needle))
                .collect();
            json!({"candidates": candidates})
        }
        Some("arbitrary") => json!({
            "geometry": {
                "type": "LineString",
                "coordinates": [
                    [request["start"]["lng"], request["start"]["lat"]],
                    [request["end"]["lng"], request["end"]["lat"]],
                ]
            }
        }),
        _ => json!({"error": "unknown queryType"}),
    }
}

/// Answers immediately.
pub fn route_engine() -> Script {
    Arc::new(|request| Reply::Now(answer(request)))
}

/// Answers after a random delay of up to `max_ms`, so replies overtake
/// each other.
pub fn jittered_engine(max_ms: u64) -> Script {
    Arc::new(move |request| {
        let delay = rand::thread_rng().gen_range(0..=max_ms);
        Reply::After(Duration::from_millis(delay), answer(request))
    })
}

pub struct FakeEngine {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    hangup: watch::Sender<u64>,
    task: JoinHandle<()>,
}

impl FakeEngine {
    /// Start listening. With `echo_ids` every reply carries the request's
    /// `id`; without it replies are untagged.
    pub async fn start(echo_ids: bool, script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (hangup, _) = watch::channel(0u64);

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            let hangup = hangup.subscribe();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        stream,
                        echo_ids,
                        Arc::clone(&script),
                        Arc::clone(&received),
                        hangup.clone(),
                    ));
                }
            })
        };

        Self {
            addr,
            received,
            connections,
            hangup,
            task,
        }
    }

    pub fn address(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Every request seen so far, in arrival order
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close every open connection; new ones are still accepted.
    pub fn drop_connections(&self) {
        self.hangup.send_modify(|generation| *generation += 1);
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.task.abort();
        self.drop_connections();
    }
}

async fn serve_connection(
    stream: TcpStream,
    echo_ids: bool,
    script: Script,
    received: Arc<Mutex<Vec<Value>>>,
    mut hangup: watch::Receiver<u64>,
) {
    hangup.borrow_and_update();
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = hangup.changed() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                received.lock().unwrap().push(request.clone());

                let (delay, body) = match script(&request) {
                    Reply::Now(body) => (Duration::ZERO, body),
                    Reply::After(delay, body) => (delay, body),
                    Reply::Silent => continue,
                    Reply::Hangup => break,
                };
                let mut text = stamp(&request, body, echo_ids).to_string();
                text.push('\n');

                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let _ = writer.lock().await.write_all(text.as_bytes()).await;
                });
            }
        }
    }

    let _ = writer.lock().await.shutdown().await;
}

/// Echo `queryType` and, if asked, `id` onto an object reply.
fn stamp(request: &Value, body: Value, echo_ids: bool) -> Value {
    let Value::Object(mut reply) = body else {
        return body;
    };
    reply
        .entry("queryType")
        .or_insert_with(|| request["queryType"].clone());
    if echo_ids {
        if let Some(id) = request.get("id") {
            reply.insert("id".to_string(), id.clone());
        }
    }
    Value::Object(reply)
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Socket-mode configuration with short timers for tests.
pub fn socket_config(address: &str, discipline: CorrelationDiscipline) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backend.address = address.parse().unwrap();
    config.backend.discipline = discipline;
    config.backend.connect_timeout = Duration::from_secs(1);
    config.backend.backoff.initial = Duration::from_millis(20);
    config.backend.backoff.max = Duration::from_millis(200);
    config.timeouts.request = Duration::from_secs(3);
    config.timeouts.shutdown_grace = Duration::from_millis(200);
    config
}

/// A gateway serving on an ephemeral loopback port.
pub struct RunningGateway {
    pub base_url: String,
    pub metrics: Arc<GatewayMetrics>,
    pub backend: Arc<dyn RouteBackend>,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ServiceError>>,
}

impl RunningGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let service = GatewayService::connect(config).unwrap();
        let metrics = service.metrics();
        let backend = service.backend();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown, stop) = oneshot::channel::<()>();
        let task = tokio::spawn(service.serve(listener, async move {
            let _ = stop.await;
        }));

        Self {
            base_url,
            metrics,
            backend,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown),
            task,
        }
    }

    pub async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    /// Trigger graceful shutdown and wait for the server to finish.
    pub async fn stop(mut self) -> Result<(), ServiceError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await.unwrap()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
