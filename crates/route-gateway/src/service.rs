//! Route gateway service: the HTTP front door.
//!
//! Owns the backend adapter, the request router and the push fan-out, and
//! serves them over axum until the shutdown future resolves.

use crate::channel::connector_for;
use crate::correlation::Correlator;
use crate::domain::config::{BackendMode, ConfigError, GatewayConfig};
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::ResponsePayload;
use crate::middleware::{create_cors_layer, GatewayMetrics};
use crate::ports::outbound::RouteBackend;
use crate::process::ProcessBackend;
use crate::push::{serve_listener, RouteBroadcaster};
use crate::router::{RequestRouter, RouteResult};
use crate::validation::{
    validate_arbitrary_request, validate_fuzzy_request, validate_path_request,
};
use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Service setup and serving errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("backend setup failed: {0}")]
    Backend(String),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct GatewayService {
    config: GatewayConfig,
    router: Arc<RequestRouter>,
    broadcaster: Option<Arc<RouteBroadcaster>>,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayService {
    /// Create a service over an existing backend adapter.
    pub fn new(
        config: GatewayConfig,
        backend: Arc<dyn RouteBackend>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let router = Arc::new(RequestRouter::new(
            backend,
            config.routing.default_route_type,
        ));
        let broadcaster = config.push.enabled.then(|| {
            Arc::new(RouteBroadcaster::new(
                config.push.listener_buffer,
                Arc::clone(&metrics),
            ))
        });

        Ok(Self {
            config,
            router,
            broadcaster,
            metrics,
        })
    }

    /// Create a service with the backend adapter the configuration selects.
    ///
    /// Must be called inside a tokio runtime: the socket adapter spawns its
    /// channel actor immediately.
    pub fn connect(config: GatewayConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let metrics = Arc::new(GatewayMetrics::new());

        let backend: Arc<dyn RouteBackend> = match config.backend.mode {
            BackendMode::Socket => {
                let connector = connector_for(&config.backend.address)
                    .map_err(|e| ServiceError::Backend(e.to_string()))?;
                Arc::new(Correlator::new(
                    connector,
                    &config.backend,
                    config.timeouts.request,
                    Arc::clone(&metrics),
                ))
            }
            BackendMode::Process => Arc::new(ProcessBackend::new(
                config.process.clone(),
                config.timeouts.request,
            )),
        };

        Self::new(config, backend, metrics)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn backend(&self) -> Arc<dyn RouteBackend> {
        Arc::clone(self.router.backend())
    }

    pub fn broadcaster(&self) -> Option<Arc<RouteBroadcaster>> {
        self.broadcaster.clone()
    }

    /// Build the HTTP router with its middleware stack
    pub fn http_router(&self) -> Router {
        let state = AppState {
            router: Arc::clone(&self.router),
            broadcaster: self.broadcaster.clone(),
            metrics: Arc::clone(&self.metrics),
        };

        let mut router = Router::new()
            .route("/calculate-path", post(calculate_path))
            .route("/fuzzy-search", post(fuzzy_search))
            .route("/calculate-route-arbitrary", post(calculate_route_arbitrary))
            .route("/health", get(health))
            .route("/metrics", get(metrics));

        if let Some(broadcaster) = &self.broadcaster {
            let broadcaster = Arc::clone(broadcaster);
            router = router.route(
                "/map-updates",
                get(move |ws: WebSocketUpgrade| {
                    let broadcaster = Arc::clone(&broadcaster);
                    async move { ws.on_upgrade(move |socket| serve_listener(socket, broadcaster)) }
                }),
            );
        }

        if let Some(dir) = &self.config.http.static_dir {
            router = router.nest_service("/static", ServeDir::new(dir));
        }

        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(create_cors_layer(&self.config.cors));

        router
            .layer(DefaultBodyLimit::max(self.config.http.max_body_size))
            .layer(middleware)
            .with_state(state)
    }

    /// Serve until `shutdown` resolves, then drain the backend.
    ///
    /// On shutdown the listener stops accepting, push listeners are closed,
    /// and the backend gets `timeouts.shutdown_grace` to finish in-flight
    /// requests while axum waits for open HTTP requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let app = self.http_router();
        let backend = self.backend();
        let grace = self.config.timeouts.shutdown_grace;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let broadcaster = self.broadcaster.clone();
        let signal = async move {
            shutdown.await;
            info!("Shutdown requested, no longer accepting connections");
            if let Some(broadcaster) = broadcaster {
                broadcaster.close_all();
            }
            let _ = stop_tx.send(());
        };

        let drain = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                if stop_rx.await.is_ok() {
                    backend.shutdown(grace).await;
                }
            })
        };

        info!(
            addr = %addr,
            mode = backend.status().mode,
            "Route gateway listening"
        );
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await;

        let _ = drain.await;
        backend.shutdown(grace).await;
        info!("Route gateway stopped");

        result.map_err(ServiceError::Io)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    router: Arc<RequestRouter>,
    broadcaster: Option<Arc<RouteBroadcaster>>,
    metrics: Arc<GatewayMetrics>,
}

impl AppState {
    fn publish(&self, route: &RouteResult) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.publish(route.query_type, &route.geometry);
        }
    }

    /// Record the outcome and turn it into the HTTP response.
    fn respond(
        &self,
        operation: &'static str,
        started: Instant,
        outcome: GatewayResult<ResponsePayload>,
    ) -> Response {
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(body) => {
                self.metrics.record_request(Ok(()), latency_ms);
                debug!(operation = operation, latency_ms = latency_ms, "Request succeeded");
                Json(body).into_response()
            }
            Err(err) => {
                self.metrics.record_request(Err(&err), latency_ms);
                if matches!(err, GatewayError::Validation(_)) {
                    debug!(operation = operation, error = %err, "Rejected invalid request");
                } else {
                    warn!(
                        operation = operation,
                        kind = err.kind(),
                        error = %err,
                        latency_ms = latency_ms,
                        "Request failed"
                    );
                }
                err.into_response()
            }
        }
    }
}

type JsonBody = Result<Json<Value>, JsonRejection>;

fn body_value(body: JsonBody) -> GatewayResult<Value> {
    body.map(|Json(value)| value).map_err(|rejection| {
        GatewayError::validation(format!("Invalid JSON body: {}", rejection.body_text()))
    })
}

async fn calculate_path(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let outcome = async {
        let query = validate_path_request(&body_value(body)?)?;
        let route = state.router.calculate_path(query).await?;
        state.publish(&route);
        Ok(ResponsePayload::Geometry(route.geometry))
    }
    .await;
    state.respond("calculate-path", started, outcome)
}

async fn fuzzy_search(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let outcome = async {
        let query = validate_fuzzy_request(&body_value(body)?)?;
        let candidates = state.router.fuzzy_search(query).await?;
        Ok(ResponsePayload::Candidates(candidates))
    }
    .await;
    state.respond("fuzzy-search", started, outcome)
}

async fn calculate_route_arbitrary(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let outcome = async {
        let query = validate_arbitrary_request(&body_value(body)?)?;
        let route = state.router.calculate_arbitrary(query).await?;
        state.publish(&route);
        Ok(ResponsePayload::Geometry(route.geometry))
    }
    .await;
    state.respond("calculate-route-arbitrary", started, outcome)
}

/// Always 200; `status` says whether the engine is reachable.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = state.router.backend().status();
    Json(serde_json::json!({
        "status": if status.is_healthy() { "ok" } else { "degraded" },
        "mode": status.mode,
        "channel": status.channel,
        "pending": status.pending,
        "listeners": state.broadcaster.as_ref().map_or(0, |b| b.listener_count()),
    }))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(state.metrics.to_json())
}
