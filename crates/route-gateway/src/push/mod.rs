//! Map-update push: computed routes are fanned out to passive listeners,
//! independent of the HTTP reply to the requester.

pub mod broadcaster;
pub mod listener;

pub use broadcaster::{PublishReport, RouteBroadcaster, RouteUpdate};
pub use listener::serve_listener;
