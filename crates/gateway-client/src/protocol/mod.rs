//! Gateway protocol definitions
//!
//! Packet codec: op codes, the wire envelope, control payloads, intents and close codes.

mod close_codes;
mod intents;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use intents::Intents;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload};
