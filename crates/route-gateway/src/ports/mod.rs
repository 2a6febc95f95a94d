//! Port traits at the seam between the HTTP side and the backend adapters.

pub mod outbound;

pub use outbound::{BackendStatus, RouteBackend};
