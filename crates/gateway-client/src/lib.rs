//! # gateway-client
//!
//! Client-side session state machine for a real-time event gateway:
//! handshake, heartbeats, sequence tracking and resume/reconnect policy.

pub mod bootstrap;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

pub use client::{run, ClientConfig, GatewayClient};
pub use connection::ConnectionState;
pub use error::{GatewayError, GatewayResult};
