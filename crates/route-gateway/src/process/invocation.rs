use crate::domain::types::{QueryPayload, QueryType, RequestEnvelope};

/// Positional engine arguments for one request.
///
/// | query      | arguments                         |
/// |------------|-----------------------------------|
/// | `path`     | `<start> <end>`                   |
/// | `ped_path` | `<start> <end> ped`               |
/// | `fuzzy`    | `--fuzzy <name>`                  |
/// | `arbitrary`| `<lat> <lng> <lat> <lng>`         |
pub fn query_args(envelope: &RequestEnvelope) -> Vec<String> {
    match envelope.payload() {
        QueryPayload::Named {
            start_location,
            end_location,
        } => {
            let mut args = vec![start_location.clone(), end_location.clone()];
            if envelope.query_type() == QueryType::PedPath {
                args.push("ped".to_string());
            }
            args
        }
        QueryPayload::Fuzzy { location_name } => {
            vec!["--fuzzy".to_string(), location_name.clone()]
        }
        QueryPayload::Coordinates { start, end } => vec![
            start.lat.to_string(),
            start.lng.to_string(),
            end.lat.to_string(),
            end.lng.to_string(),
        ],
    }
}
