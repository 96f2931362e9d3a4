//! RPC handler bridging wire messages to the transfer service.

use std::sync::Arc;

use mhserver_data_server::{Handler, HandlerFuture};
use mhserver_protocol::constants::{
    WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_END_OF_DATA, WS_ERR_CODE_INTERNAL,
    WS_ERR_CODE_NOT_FOUND, WS_ERR_CODE_PAYLOAD_TOO_LARGE,
};
use mhserver_protocol::messages::{
    ConnectionCreated, CreateConnectionRequest, DataPart, GetDataRequest, GetSumRequest,
    SaveChunkHeader, SaveDataRequest, ShaSum,
};
use mhserver_protocol::{Message, MessageType};
use mhserver_transfer::{ErrorKind, TransferError, TransferRequest, TransferService};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serves the data RPC surface from one [`TransferService`].
pub struct DataHandler {
    service: Arc<TransferService>,
}

impl DataHandler {
    pub fn new(service: Arc<TransferService>) -> Self {
        Self { service }
    }
}

impl Handler for DataHandler {
    fn on_create_connection(&self, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: CreateConnectionRequest = match parse(&msg) {
                Ok(req) => req,
                Err(bad) => return bad,
            };
            let request = TransferRequest {
                username: req.username,
                filename: req.filename,
                category: req.category,
                size: req.size,
            };
            match self.service.create_connection(&request) {
                Ok(conn) => reply(
                    &msg,
                    MessageType::ConnectionCreated,
                    &ConnectionCreated {
                        handle: conn.handle.to_string(),
                        chunk_size: conn.chunk_size,
                        chunks_count: conn.chunk_count,
                    },
                ),
                Err(e) => error_reply(&msg.id, &e),
            }
        })
    }

    fn on_get_data(&self, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: GetDataRequest = match parse(&msg) {
                Ok(req) => req,
                Err(bad) => return bad,
            };
            match self.service.get_data(&req.handle, req.chunk_id).await {
                Ok(part) => reply(
                    &msg,
                    MessageType::DataPart,
                    &DataPart {
                        chunk: part.chunk,
                        offset: part.offset,
                    },
                ),
                Err(e) => error_reply(&msg.id, &e),
            }
        })
    }

    fn on_save_data(&self, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: SaveDataRequest = match parse(&msg) {
                Ok(req) => req,
                Err(bad) => return bad,
            };
            save(&self.service, msg.id, &req.handle, req.chunk, req.offset).await
        })
    }

    fn on_binary_save(&self, header: SaveChunkHeader, chunk: Vec<u8>) -> HandlerFuture<'_> {
        Box::pin(async move {
            save(&self.service, header.id, &header.handle, chunk, header.offset).await
        })
    }

    fn on_get_sum(&self, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: GetSumRequest = match parse(&msg) {
                Ok(req) => req,
                Err(bad) => return bad,
            };
            match self.service.get_sum(&req.handle, req.chunk_id).await {
                Ok(sum) => reply(&msg, MessageType::ShaSum, &ShaSum { sum: sum.to_vec() }),
                Err(e) => error_reply(&msg.id, &e),
            }
        })
    }
}

async fn save(
    service: &TransferService,
    id: String,
    handle: &str,
    chunk: Vec<u8>,
    offset: u64,
) -> Message {
    match service.save_data(handle, chunk, offset).await {
        Ok(()) => data_saved(id),
        Err(e) => error_reply(&id, &e),
    }
}

/// Payload-less acknowledgement of a saved chunk.
fn data_saved(id: String) -> Message {
    Message::new::<()>(id.clone(), MessageType::DataSaved, None).unwrap_or_else(|e| {
        tracing::error!(%id, "failed to build reply: {e}");
        Message::error(id, WS_ERR_CODE_INTERNAL, "internal error")
    })
}

/// Decodes the request payload, or builds the 400 reply.
fn parse<T: DeserializeOwned>(msg: &Message) -> Result<T, Message> {
    match msg.parse_payload() {
        Ok(Some(req)) => Ok(req),
        Ok(None) => Err(msg.reply_error(WS_ERR_CODE_BAD_REQUEST, "invalid payload: missing")),
        Err(e) => {
            tracing::debug!(id = %msg.id, "invalid payload: {e}");
            Err(msg.reply_error(WS_ERR_CODE_BAD_REQUEST, "invalid payload"))
        }
    }
}

fn reply<T: Serialize>(msg: &Message, msg_type: MessageType, payload: &T) -> Message {
    msg.reply(msg_type, Some(payload)).unwrap_or_else(|e| {
        tracing::error!(id = %msg.id, ?msg_type, "failed to build reply: {e}");
        msg.reply_error(WS_ERR_CODE_INTERNAL, "internal error")
    })
}

/// Wire code of an engine error.
fn error_code(err: &TransferError) -> i32 {
    if let TransferError::ChunkTooLarge { .. } = err {
        return WS_ERR_CODE_PAYLOAD_TOO_LARGE;
    }
    match err.kind() {
        ErrorKind::Validation => WS_ERR_CODE_BAD_REQUEST,
        ErrorKind::NotFound => WS_ERR_CODE_NOT_FOUND,
        ErrorKind::EndOfData => WS_ERR_CODE_END_OF_DATA,
        ErrorKind::Internal => WS_ERR_CODE_INTERNAL,
    }
}

fn error_reply(id: &str, err: &TransferError) -> Message {
    Message::error(id, error_code(err), err.public_message())
}
