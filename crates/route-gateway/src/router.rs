//! Request router.
//!
//! Maps the four client operations onto backend request envelopes and
//! backend replies onto client-facing payloads.
//!
//! | Operation        | queryType  | success body                     |
//! |------------------|------------|----------------------------------|
//! | path, car        | `path`     | route geometry                   |
//! | path, pedestrian | `ped_path` | route geometry                   |
//! | fuzzy search     | `fuzzy`    | ordered candidate names          |
//! | arbitrary route  | `arbitrary`| route geometry                   |

use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{QueryPayload, QueryType, RequestEnvelope, RouteType};
use crate::ports::outbound::RouteBackend;
use crate::validation::{ArbitraryQuery, FuzzyQuery, PathQuery};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A computed route
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub query_type: QueryType,
    pub geometry: Value,
}

pub struct RequestRouter {
    backend: Arc<dyn RouteBackend>,
    default_route_type: Option<RouteType>,
}

impl RequestRouter {
    pub fn new(backend: Arc<dyn RouteBackend>, default_route_type: Option<RouteType>) -> Self {
        Self {
            backend,
            default_route_type,
        }
    }

    pub fn backend(&self) -> &Arc<dyn RouteBackend> {
        &self.backend
    }

    /// Resolve the travel mode. Absent or unknown modes are rejected unless
    /// a default is configured for the absent case.
    pub fn resolve_route_type(&self, requested: Option<&str>) -> GatewayResult<RouteType> {
        match requested {
            None | Some("") => self.default_route_type.ok_or_else(|| {
                GatewayError::validation("Route type required: expected \"car\" or \"ped\"")
            }),
            Some(name) => RouteType::parse(name).ok_or_else(|| {
                GatewayError::validation(format!(
                    "Unsupported route type \"{}\": expected \"car\" or \"ped\"",
                    name
                ))
            }),
        }
    }

    pub fn path_envelope(&self, query: PathQuery) -> GatewayResult<RequestEnvelope> {
        let route_type = self.resolve_route_type(query.route_type.as_deref())?;
        Ok(RequestEnvelope::new(
            route_type.query_type(),
            QueryPayload::Named {
                start_location: query.start_location,
                end_location: query.end_location,
            },
        ))
    }

    pub async fn calculate_path(&self, query: PathQuery) -> GatewayResult<RouteResult> {
        let envelope = self.path_envelope(query)?;
        self.route(envelope).await
    }

    pub async fn fuzzy_search(&self, query: FuzzyQuery) -> GatewayResult<Vec<String>> {
        let envelope = RequestEnvelope::new(
            QueryType::Fuzzy,
            QueryPayload::Fuzzy {
                location_name: query.location_name,
            },
        );
        let id = envelope.id();
        let reply = self.backend.execute(envelope).await?;
        let candidates = decode_candidates(reply)?;
        debug!(correlation_id = %id, candidates = candidates.len(), "Fuzzy search resolved");
        Ok(candidates)
    }

    pub async fn calculate_arbitrary(&self, query: ArbitraryQuery) -> GatewayResult<RouteResult> {
        let envelope = RequestEnvelope::new(
            QueryType::Arbitrary,
            QueryPayload::Coordinates {
                start: query.start,
                end: query.end,
            },
        );
        self.route(envelope).await
    }

    async fn route(&self, envelope: RequestEnvelope) -> GatewayResult<RouteResult> {
        let query_type = envelope.query_type();
        let id = envelope.id();
        let reply = self.backend.execute(envelope).await?;
        let geometry = decode_route(reply)?;
        debug!(correlation_id = %id, query_type = %query_type, "Route resolved");
        Ok(RouteResult {
            query_type,
            geometry,
        })
    }
}

/// Text of an engine-reported `{"error": ...}`, if the reply is one.
fn backend_error(reply: &Value) -> Option<GatewayError> {
    let error = reply.as_object()?.get("error")?;
    let reason = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(GatewayError::Backend(reason))
}

/// Accepts `{"geometry": ...}`, a bare GeoJSON object, or `{"error": ...}`.
pub fn decode_route(reply: Value) -> GatewayResult<Value> {
    if let Some(err) = backend_error(&reply) {
        return Err(err);
    }

    let Value::Object(mut object) = reply else {
        return Err(GatewayError::protocol("expected a route object"));
    };

    match object.remove("geometry") {
        Some(Value::Null) | None => {}
        Some(geometry) => return Ok(geometry),
    }

    if object.contains_key("type") {
        object.remove("queryType");
        return Ok(Value::Object(object));
    }

    Err(GatewayError::protocol("route reply has no geometry"))
}

/// Accepts a bare array of names, `{"candidates": [...]}`, or `{"error": ...}`.
pub fn decode_candidates(reply: Value) -> GatewayResult<Vec<String>> {
    if let Some(err) = backend_error(&reply) {
        return Err(err);
    }

    let list = match reply {
        Value::Array(list) => list,
        Value::Object(mut object) => match object.remove("candidates") {
            Some(Value::Array(list)) => list,
            _ => return Err(GatewayError::protocol("fuzzy reply has no candidates")),
        },
        _ => return Err(GatewayError::protocol("expected a list of candidates")),
    };

    list.into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            other => Err(GatewayError::protocol(format!(
                "candidate is not a string: {}",
                other
            ))),
        })
        .collect()
}
