//! Connection management
//!
//! Physical connections, the session state they share and the heartbeat
//! supervisor that keeps them alive.

mod connection;
mod heartbeat;
mod sequence;
mod session;

pub(crate) use connection::{Connection, ConnectionEvent};
pub(crate) use heartbeat::send_heartbeat;
pub use heartbeat::Beat;
pub use sequence::SequenceTracker;
pub use session::{ConnectionState, ResumeTarget, Session};
