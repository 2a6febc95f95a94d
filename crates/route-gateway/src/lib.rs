//! # Route Gateway
//!
//! Request-multiplexing gateway between many short-lived map clients and a
//! single long-lived routing / location-search engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           ROUTE GATEWAY                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  HTTP clients          Listeners (WebSocket /map-updates)            │
//! │      │                        ▲                                      │
//! │      ▼                        │                                      │
//! │  ┌──────────────┐    ┌────────┴─────────┐                            │
//! │  │ validation   │    │ RouteBroadcaster │                            │
//! │  └──────┬───────┘    └────────▲─────────┘                            │
//! │         ▼                     │ computed routes                      │
//! │  ┌──────────────────────────────────┐                                │
//! │  │          RequestRouter           │                                │
//! │  └──────────────┬───────────────────┘                                │
//! │                 ▼ dyn RouteBackend                                   │
//! │  ┌───────────────────────────┐   ┌─────────────────────────────┐     │
//! │  │ Correlator                │   │ ProcessBackend              │     │
//! │  │  tagged: id → waiter      │   │  one engine run per request │     │
//! │  │  sequential: FIFO, 1 slot │   │  stdout / shared / per-file │     │
//! │  └────────────┬──────────────┘   └─────────────────────────────┘     │
//! │               ▼                                                      │
//! │  ┌───────────────────────────┐                                       │
//! │  │ BackendChannel actor      │  Disconnected → Connecting →          │
//! │  │  NDJSON frames, backoff   │  Connected → Draining                 │
//! │  └────────────┬──────────────┘                                       │
//! │               ▼                                                      │
//! │         routing engine (tcp:// or unix:)                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reply matching
//!
//! With the tagged discipline each request carries a UUID v7 `id` that the
//! engine echoes back, so many requests share the channel concurrently.
//! Engines that do not echo ids run under the sequential discipline: one
//! request in flight, replies checked against the expected `queryType`.
//!
//! ## Failure handling
//!
//! | Failure                       | HTTP status |
//! |-------------------------------|-------------|
//! | invalid client input          | 400         |
//! | engine unreachable / dropped  | 502         |
//! | malformed engine reply        | 502         |
//! | no reply before the deadline  | 504         |
//! | engine-reported error         | 500         |

#![allow(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod channel;
pub mod correlation;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod process;
pub mod push;
pub mod router;
pub mod service;
pub mod validation;

// Re-exports
pub use channel::{BackendChannel, ChannelError, Connector, MemoryConnector};
pub use correlation::{Correlator, PendingHandle};
pub use domain::*;
pub use middleware::GatewayMetrics;
pub use ports::outbound::{BackendStatus, RouteBackend};
pub use process::ProcessBackend;
pub use push::RouteBroadcaster;
pub use router::{RequestRouter, RouteResult};
pub use service::{GatewayService, ServiceError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
