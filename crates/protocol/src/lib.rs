//! Wire protocol of the mhserver data RPC surface.
//!
//! Every frame is a JSON [`Message`] envelope, except binary `SaveData`
//! frames which carry a [`messages::SaveChunkHeader`] followed by raw bytes.

pub mod constants;
pub mod envelope;
pub mod messages;

pub use constants::MessageType;
pub use envelope::{Message, WsError};
