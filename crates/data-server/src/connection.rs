//! Client connection management: read/write pumps, ping/pong, per-call tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mhserver_protocol::constants::{
    BINARY_HEADER_LEN_SIZE, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_INTERNAL, WS_ERR_CODE_NOT_IMPLEMENTED, WS_ERR_CODE_TIMEOUT, WS_PING_PERIOD,
    WS_PONG_WAIT, WS_WRITE_WAIT,
};
use mhserver_protocol::{Message, MessageType};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::binary::{BinaryFrame, parse_binary_frame};
use crate::handler::Handler;

/// Handle for sending frames to one client.
///
/// Cloneable; wraps an `mpsc::Sender` drained by the write pump.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text, waiting for buffer space.
    ///
    /// Returns `Err` only if the client is gone.
    pub async fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Returns `true` until the write pump has stopped.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the client connection is closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: connection closed")]
pub struct SendError;

/// Per-connection settings handed down from the server.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionConfig {
    pub call_timeout: Duration,
}

/// An active client connection.
pub struct ClientConnection {
    pub peer_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals both pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tasks and stop when the client goes away or
/// `server_cancel` fires.
pub(crate) fn spawn_connection<S, H>(
    ws_stream: S,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    config: ConnectionConfig,
    server_cancel: CancellationToken,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    let read_sender = sender.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, read_sender, handler, config, read_cancel.clone()).await;
        // Stop the write pump too.
        read_cancel.cancel();
        tracing::info!(%peer_addr, "client disconnected");
    });

    ClientConnection {
        peer_addr,
        sender,
        cancel,
    }
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(ws_msg) = msg else { break };
                match tokio::time::timeout(WS_WRITE_WAIT, sink.send(ws_msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!("write pump send error: {e}");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!("client stalled for {WS_WRITE_WAIT:?}, closing connection");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and hands each call to its own task.
///
/// Any frame counts as liveness; the connection is dropped after
/// `WS_PONG_WAIT` of silence.
async fn read_pump<S, H>(
    mut stream: S,
    sender: Sender,
    handler: Arc<H>,
    config: ConnectionConfig,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let idle = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = &mut idle => {
                tracing::warn!("no frames within {WS_PONG_WAIT:?}, closing connection");
                break;
            }

            frame = stream.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch_text(&handler, &sender, config, &text);
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        dispatch_binary(&handler, &sender, config, &data);
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    Some(Ok(WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::debug!("received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Parses a JSON frame and routes it to the handler on a new task.
fn dispatch_text<H: Handler>(
    handler: &Arc<H>,
    sender: &Sender,
    config: ConnectionConfig,
    text: &str,
) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            reject(sender, config, salvage_id(text.as_bytes()), MessageType::Unknown);
            return;
        }
    };

    let id = msg.id.clone();
    let msg_type = msg.msg_type;
    let handler = Arc::clone(handler);
    run_call(sender.clone(), config, id, msg_type, async move {
        match msg.msg_type {
            MessageType::CreateConnection => handler.on_create_connection(msg).await,
            MessageType::GetData => handler.on_get_data(msg).await,
            MessageType::SaveData => handler.on_save_data(msg).await,
            MessageType::GetSum => handler.on_get_sum(msg).await,
            MessageType::Ping => handler.on_ping(msg).await,
            _ => {
                tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
                msg.reply_error(WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type")
            }
        }
    });
}

/// Parses a binary `save_data` frame and routes it on a new task.
fn dispatch_binary<H: Handler>(
    handler: &Arc<H>,
    sender: &Sender,
    config: ConnectionConfig,
    data: &[u8],
) {
    let BinaryFrame { header, chunk } = match parse_binary_frame(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("failed to parse binary frame: {e}");
            let id = binary_header(data).map(salvage_id).unwrap_or_default();
            reject(sender, config, id, MessageType::SaveData);
            return;
        }
    };
    if chunk.is_empty() {
        tracing::warn!(id = %header.id, "binary save_data frame without chunk bytes");
        reject(sender, config, header.id, MessageType::SaveData);
        return;
    }

    let id = header.id.clone();
    let handler = Arc::clone(handler);
    run_call(
        sender.clone(),
        config,
        id,
        MessageType::SaveData,
        async move { handler.on_binary_save(header, chunk).await },
    );
}

/// Replies 400 `invalid payload` to a frame that could not be decoded.
fn reject(sender: &Sender, config: ConnectionConfig, id: String, msg_type: MessageType) {
    let reply = Message::error(id.clone(), WS_ERR_CODE_BAD_REQUEST, "invalid payload");
    run_call(sender.clone(), config, id, msg_type, async move { reply });
}

/// Best-effort `id` of an undecodable JSON object, empty when unknown.
fn salvage_id(json: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(json)
        .ok()
        .and_then(|v| v.get("id")?.as_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Header bytes of a binary frame, when the length prefix is satisfiable.
fn binary_header(data: &[u8]) -> Option<&[u8]> {
    let (len_bytes, rest) = data.split_first_chunk::<BINARY_HEADER_LEN_SIZE>()?;
    rest.get(..u32::from_be_bytes(*len_bytes) as usize)
}

/// Runs one call on its own task and sends its reply.
///
/// If the call misses the deadline the caller gets a timeout error; the
/// call itself keeps running to completion and its late reply is dropped.
fn run_call<F>(sender: Sender, config: ConnectionConfig, id: String, msg_type: MessageType, call: F)
where
    F: Future<Output = Message> + Send + 'static,
{
    tokio::spawn(async move {
        let reply = match tokio::time::timeout(config.call_timeout, tokio::spawn(call)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::error!(%id, ?msg_type, "call task failed: {e}");
                Message::error(id, WS_ERR_CODE_INTERNAL, "internal error")
            }
            Err(_) => {
                tracing::warn!(%id, ?msg_type, "call exceeded {:?}", config.call_timeout);
                Message::error(id, WS_ERR_CODE_TIMEOUT, "deadline exceeded")
            }
        };
        if sender.send_msg(reply).await.is_err() {
            tracing::debug!("client gone before reply could be sent");
        }
    });
}
