//! Application events
//!
//! Dispatch payloads leave the state machine through an [`EventSink`].

mod dispatcher;
mod sink;

pub use dispatcher::{DispatchEvent, EventDispatcher};
pub use sink::{ChannelSink, EventSink, LoggingSink};
