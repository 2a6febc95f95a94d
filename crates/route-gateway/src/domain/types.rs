//! Core request and response types shared by the router, the correlation
//! layer and the backend adapters.

use crate::domain::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend query kind, carried on the wire as `queryType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Car route between two named locations
    Path,
    /// Pedestrian route between two named locations
    PedPath,
    /// Fuzzy location-name search
    Fuzzy,
    /// Route between two arbitrary coordinates
    Arbitrary,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Path => "path",
            QueryType::PedPath => "ped_path",
            QueryType::Fuzzy => "fuzzy",
            QueryType::Arbitrary => "arbitrary",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Travel mode selected by the `type` field of `/calculate-path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Car,
    Ped,
}

impl RouteType {
    /// Parse the client-facing spelling. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "car" => Some(RouteType::Car),
            "ped" => Some(RouteType::Ped),
            _ => None,
        }
    }

    pub fn query_type(&self) -> QueryType {
        match self {
            RouteType::Car => QueryType::Path,
            RouteType::Ped => QueryType::PedPath,
        }
    }
}

/// A WGS84 coordinate, sent to the engine as `{lat, lng}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Operation-specific request fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryPayload {
    Named {
        #[serde(rename = "startLocation")]
        start_location: String,
        #[serde(rename = "endLocation")]
        end_location: String,
    },
    Fuzzy {
        #[serde(rename = "locationName")]
        location_name: String,
    },
    Coordinates { start: LatLng, end: LatLng },
}

/// One backend request.
///
/// Not `Clone`: submitting consumes the envelope, so each correlation id
/// is registered once.
#[derive(Debug)]
pub struct RequestEnvelope {
    id: CorrelationId,
    query_type: QueryType,
    payload: QueryPayload,
}

impl RequestEnvelope {
    /// Create an envelope with a fresh correlation id.
    pub fn new(query_type: QueryType, payload: QueryPayload) -> Self {
        Self {
            id: CorrelationId::new(),
            query_type,
            payload,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn payload(&self) -> &QueryPayload {
        &self.payload
    }

    /// Build the wire message `{queryType, ...fields}`, optionally tagged
    /// with the correlation id.
    pub fn to_wire(&self, with_id: bool) -> serde_json::Value {
        let mut message = match serde_json::to_value(&self.payload) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        message.insert(
            "queryType".to_string(),
            serde_json::Value::String(self.query_type.as_str().to_string()),
        );
        if with_id {
            message.insert(
                "id".to_string(),
                serde_json::Value::String(self.id.to_string()),
            );
        }
        serde_json::Value::Object(message)
    }
}

/// Client-facing success body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Route geometry (GeoJSON object) echoed from the engine
    Geometry(serde_json::Value),
    /// Ordered fuzzy-search candidates, possibly empty
    Candidates(Vec<String>),
}

/// Lifecycle of the backend channel. Only the channel actor writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Draining,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Draining => write!(f, "draining"),
        }
    }
}

/// Read the `queryType` a reply echoes, if any.
///
/// `Some(None)` means the field is present but not a known query type.
pub fn echoed_query_type(reply: &serde_json::Value) -> Option<Option<QueryType>> {
    reply
        .get("queryType")
        .map(|v| serde_json::from_value::<QueryType>(v.clone()).ok())
}
