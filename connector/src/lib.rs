//! Crank connector
//!
//! Target-side endpoint of a crank tunnel. Each socket opened to a router
//! carries one HTTP request description in, is relayed to the local origin,
//! and carries the origin's response back before being closed.

pub mod config;
pub mod connector;
pub mod manager;
pub mod origin;
pub mod relay;
pub mod session;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConnectorConfig, OriginConfig};
pub use connector::{Connector, Ending};
pub use manager::{connect_and_serve, ConnectorManager};
pub use origin::{HttpOrigin, OriginEvent, OriginEvents, ReqwestOrigin};
pub use session::PendingRequest;
pub use tunnel::{TunnelSink, WsTunnel};
