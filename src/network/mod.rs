//! Network module.
//!
//! Contains the Gateway (TCP/TLS listeners with admission control) and the
//! line-protocol Connection handler.

mod connection;
mod gateway;

pub use connection::{Connection, ServerContext};
pub use gateway::Gateway;
