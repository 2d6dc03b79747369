//! Integration test utilities for the gateway client
//!
//! This crate runs a mock gateway (REST lookup plus WebSocket endpoint) on a
//! local port so the client can be exercised over real sockets.

pub mod helpers;

pub use helpers::*;
