//! Handler trait for processing data RPC calls.
//!
//! Implementors provide the transfer logic; the server framework handles
//! connections, routing, per-call tasks and deadlines.

use std::future::Future;
use std::pin::Pin;

use mhserver_protocol::constants::WS_ERR_CODE_NOT_IMPLEMENTED;
use mhserver_protocol::messages::SaveChunkHeader;
use mhserver_protocol::{Message, MessageType};

/// A boxed future resolving to the reply envelope of one call.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Message> + Send + 'a>>;

/// Trait for handling data RPC calls.
///
/// Every method receives the parsed request and resolves to the reply that
/// is sent back to the caller (a response or an `error` envelope carrying
/// the request id). Each call runs on its own task, so implementations may
/// block on I/O without stalling other calls of the same connection.
///
/// Default implementations reply with "not implemented".
pub trait Handler: Send + Sync + 'static {
    /// Called for `create_connection`.
    fn on_create_connection(&self, msg: Message) -> HandlerFuture<'_> {
        not_implemented(msg)
    }

    /// Called for `get_data`.
    fn on_get_data(&self, msg: Message) -> HandlerFuture<'_> {
        not_implemented(msg)
    }

    /// Called for `save_data` sent as JSON (base64 chunk).
    fn on_save_data(&self, msg: Message) -> HandlerFuture<'_> {
        not_implemented(msg)
    }

    /// Called for `get_sum`.
    fn on_get_sum(&self, msg: Message) -> HandlerFuture<'_> {
        not_implemented(msg)
    }

    /// Called for a binary `save_data` frame.
    fn on_binary_save(&self, header: SaveChunkHeader, chunk: Vec<u8>) -> HandlerFuture<'_> {
        let _ = chunk;
        Box::pin(async move {
            Message::error(
                header.id,
                WS_ERR_CODE_NOT_IMPLEMENTED,
                "not implemented",
            )
        })
    }

    /// Called for `ping`.
    fn on_ping(&self, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            msg.reply::<()>(MessageType::Pong, None)
                .unwrap_or_else(|e| msg.reply_error(500, e.to_string()))
        })
    }
}

fn not_implemented(msg: Message) -> HandlerFuture<'static> {
    Box::pin(async move { msg.reply_error(WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented") })
}
