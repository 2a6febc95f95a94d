//! Client input validation.
//!
//! Runs before anything reaches the backend. Every failure is a
//! [`GatewayError::Validation`] whose text is returned verbatim to the client.

use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::LatLng;
use serde_json::{Map, Value};

/// Validated `/calculate-path` body
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    pub start_location: String,
    pub end_location: String,
    /// Raw `type` field, resolved by the router
    pub route_type: Option<String>,
}

/// Validated `/fuzzy-search` body
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyQuery {
    pub location_name: String,
}

/// Validated `/calculate-route-arbitrary` body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbitraryQuery {
    pub start: LatLng,
    pub end: LatLng,
}

pub const PATH_FIELDS_REQUIRED: &str = "Start and end required";
pub const LOCATION_NAME_REQUIRED: &str = "Location name required";
pub const COORDINATES_REQUIRED: &str = "Start and end coordinates required as [lat, lng]";
pub const LOCATION_NAME_DASH: &str = "Location names must not start with '-'";

fn as_object(body: &Value) -> GatewayResult<&Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| GatewayError::validation("Request body must be a JSON object"))
}

/// A present, non-blank string field.
fn required_text(body: &Map<String, Value>, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Names become engine arguments in process mode and must not read as flags.
fn plain_name(name: String) -> GatewayResult<String> {
    if name.starts_with('-') {
        return Err(GatewayError::validation(LOCATION_NAME_DASH));
    }
    Ok(name)
}

pub fn validate_path_request(body: &Value) -> GatewayResult<PathQuery> {
    let body = as_object(body)?;

    let start = required_text(body, "startLocation");
    let end = required_text(body, "endLocation");
    let (Some(start_location), Some(end_location)) = (start, end) else {
        return Err(GatewayError::validation(PATH_FIELDS_REQUIRED));
    };

    let route_type = match body.get("type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => Some(other.to_string()),
    };

    Ok(PathQuery {
        start_location: plain_name(start_location)?,
        end_location: plain_name(end_location)?,
        route_type,
    })
}

pub fn validate_fuzzy_request(body: &Value) -> GatewayResult<FuzzyQuery> {
    let body = as_object(body)?;
    let location_name = required_text(body, "locationName")
        .ok_or_else(|| GatewayError::validation(LOCATION_NAME_REQUIRED))?;
    Ok(FuzzyQuery {
        location_name: plain_name(location_name)?,
    })
}

pub fn validate_arbitrary_request(body: &Value) -> GatewayResult<ArbitraryQuery> {
    let body = as_object(body)?;
    let start = coordinate(body.get("start"), "start")?;
    let end = coordinate(body.get("end"), "end")?;
    Ok(ArbitraryQuery { start, end })
}

/// Parse a `[lat, lng]` pair.
fn coordinate(value: Option<&Value>, field: &str) -> GatewayResult<LatLng> {
    let pair = match value.and_then(Value::as_array) {
        Some(pair) if pair.len() == 2 => pair,
        _ => return Err(GatewayError::validation(COORDINATES_REQUIRED)),
    };

    let (Some(lat), Some(lng)) = (pair[0].as_f64(), pair[1].as_f64()) else {
        return Err(GatewayError::validation(COORDINATES_REQUIRED));
    };

    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GatewayError::validation(format!(
            "{} latitude must be within [-90, 90]",
            field
        )));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(GatewayError::validation(format!(
            "{} longitude must be within [-180, 180]",
            field
        )));
    }

    Ok(LatLng { lat, lng })
}
