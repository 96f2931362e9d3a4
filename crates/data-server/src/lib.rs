//! WebSocket transport for the mhserver data RPC surface.
//!
//! Accepts any number of client connections, dispatches JSON and binary
//! frames to a [`Handler`] (one task per call, bounded by a deadline) and
//! manages the connection lifecycle (ping/pong, graceful shutdown).

mod binary;
mod connection;
mod handler;
mod server;

pub use binary::{BinaryFrame, ParseError, encode_binary_frame, parse_binary_frame};
pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{DataServer, ServerConfig};

/// Send buffer capacity per client, in frames.
///
/// Replies can carry whole chunks, so writers wait for room instead of
/// queueing without bound.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the data server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
