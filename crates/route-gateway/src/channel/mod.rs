//! Backend channel: the single owned connection to the engine.

pub mod actor;
pub mod backoff;
pub mod connector;
pub mod frame;

pub use actor::{BackendChannel, ChannelError, Inbound};
pub use backoff::Backoff;
pub use connector::{connector_for, BoxedStream, Connector, MemoryConnector, TcpConnector};
pub use frame::Frame;
