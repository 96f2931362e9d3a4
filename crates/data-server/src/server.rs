//! Data WebSocket server.
//!
//! Listens on a TCP port, upgrades every accepted connection to WebSocket
//! and serves any number of clients concurrently.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use mhserver_protocol::constants::{RPC_CALL_TIMEOUT, WS_MAX_MESSAGE_SIZE};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection::{self, ClientConnection, ConnectionConfig};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Largest accepted frame in bytes.
    pub max_message_size: usize,
    /// Deadline of one call.
    pub call_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_message_size: WS_MAX_MESSAGE_SIZE,
            call_timeout: RPC_CALL_TIMEOUT,
        }
    }
}

/// The data WebSocket server.
pub struct DataServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    clients: Mutex<Vec<ClientConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> DataServer<H> {
    /// Creates a server dispatching to `handler`.
    ///
    /// `shutdown` stops the accept loop and every client connection.
    pub fn new(config: ServerConfig, handler: H, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            clients: Mutex::new(Vec::new()),
            cancel: shutdown.child_token(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`DataServer::run`] binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Number of clients currently connected.
    pub async fn client_count(&self) -> usize {
        let mut clients = self.clients.lock().await;
        clients.retain(|c| c.sender().is_connected());
        clients.len()
    }

    /// Stops accepting and closes every client.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.listen_addr, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("data server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    for client in self.clients.lock().await.drain(..) {
                        client.close();
                    }
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection to WebSocket and starts its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "client connected");

        let mut clients = self.clients.lock().await;
        clients.retain(|c| c.sender().is_connected());
        clients.push(connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            ConnectionConfig {
                call_timeout: self.config.call_timeout,
            },
            self.cancel.clone(),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::{SinkExt, StreamExt};
    use mhserver_protocol::constants::{WS_ERR_CODE_NOT_IMPLEMENTED, WS_ERR_CODE_TIMEOUT};
    use mhserver_protocol::messages::SaveChunkHeader;
    use mhserver_protocol::{Message, MessageType};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;
    use crate::binary::encode_binary_frame;
    use crate::handler::HandlerFuture;

    /// Echoes the request id back; `get_data` sleeps first.
    #[derive(Default)]
    struct TestHandler {
        saves: AtomicUsize,
    }

    impl Handler for TestHandler {
        fn on_get_data(&self, msg: Message) -> HandlerFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                msg.reply::<()>(MessageType::DataPart, None).unwrap()
            })
        }

        fn on_binary_save(&self, header: SaveChunkHeader, chunk: Vec<u8>) -> HandlerFuture<'_> {
            Box::pin(async move {
                self.saves.fetch_add(chunk.len(), Ordering::SeqCst);
                Message::new::<()>(header.id, MessageType::DataSaved, None).unwrap()
            })
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..ServerConfig::default()
        }
    }

    async fn start(config: ServerConfig) -> (Arc<DataServer<TestHandler>>, String) {
        let server = DataServer::new(config, TestHandler::default(), CancellationToken::new());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await.unwrap() });

        for _ in 0..100 {
            if let Some(addr) = server.local_addr().await {
                return (server, format!("ws://{addr}"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not bind");
    }

    async fn next_reply<S>(ws: &mut S) -> Message
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    fn text(json: serde_json::Value) -> WsMessage {
        WsMessage::Text(json.to_string().into())
    }

    #[tokio::test]
    async fn binds_dynamic_port() {
        let (server, _) = start(test_config()).await;
        assert!(server.local_addr().await.unwrap().port() > 0);
        assert_eq!(server.client_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn serves_multiple_clients() {
        let (server, url) = start(test_config()).await;
        let (mut a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        a.send(text(serde_json::json!({"id": "a-1", "type": "ping"})))
            .await
            .unwrap();
        b.send(text(serde_json::json!({"id": "b-1", "type": "ping"})))
            .await
            .unwrap();

        let reply = next_reply(&mut a).await;
        assert_eq!((reply.id.as_str(), reply.msg_type), ("a-1", MessageType::Pong));
        let reply = next_reply(&mut b).await;
        assert_eq!((reply.id.as_str(), reply.msg_type), ("b-1", MessageType::Pong));
        assert_eq!(server.client_count().await, 2);

        server.shutdown();
    }

    #[tokio::test]
    async fn unknown_type_is_not_implemented() {
        let (server, url) = start(test_config()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        ws.send(text(serde_json::json!({"id": "x", "type": "delete_file"})))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply.id, "x");
        assert_eq!(reply.error.unwrap().code, WS_ERR_CODE_NOT_IMPLEMENTED);

        // Unimplemented handler methods answer the same way.
        ws.send(text(serde_json::json!({"id": "y", "type": "get_sum"})))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply.id, "y");
        assert_eq!(reply.error.unwrap().code, WS_ERR_CODE_NOT_IMPLEMENTED);

        server.shutdown();
    }

    #[tokio::test]
    async fn slow_call_does_not_block_the_connection() {
        let (server, url) = start(test_config()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        ws.send(text(serde_json::json!({"id": "slow", "type": "get_data"})))
            .await
            .unwrap();
        ws.send(text(serde_json::json!({"id": "fast", "type": "ping"})))
            .await
            .unwrap();

        assert_eq!(next_reply(&mut ws).await.id, "fast");
        assert_eq!(next_reply(&mut ws).await.id, "slow");
        server.shutdown();
    }

    #[tokio::test]
    async fn call_past_deadline_gets_timeout() {
        let (server, url) = start(ServerConfig {
            call_timeout: Duration::from_millis(50),
            ..test_config()
        })
        .await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        ws.send(text(serde_json::json!({"id": "slow", "type": "get_data"})))
            .await
            .unwrap();
        let reply = next_reply(&mut ws).await;
        assert_eq!(reply.id, "slow");
        assert_eq!(reply.error.unwrap().code, WS_ERR_CODE_TIMEOUT);
        server.shutdown();
    }

    #[tokio::test]
    async fn binary_save_is_dispatched() {
        let (server, url) = start(test_config()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let header = SaveChunkHeader {
            id: "bin-1".into(),
            handle: "h".into(),
            offset: 0,
        };
        let frame = encode_binary_frame(&header, &[7u8; 1000]).unwrap();
        ws.send(WsMessage::Binary(frame.into())).await.unwrap();

        let reply = next_reply(&mut ws).await;
        assert_eq!(reply.id, "bin-1");
        assert_eq!(reply.msg_type, MessageType::DataSaved);
        assert_eq!(server.handler.saves.load(Ordering::SeqCst), 1000);
        server.shutdown();
    }

    #[tokio::test]
    async fn oversized_frame_drops_connection() {
        let (server, url) = start(ServerConfig {
            max_message_size: 1024,
            ..test_config()
        })
        .await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let _ = ws.send(WsMessage::Binary(vec![0u8; 4096].into())).await;
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "connection stayed open");
        assert_eq!(server.handler.saves.load(Ordering::SeqCst), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn shutdown_closes_clients() {
        let (server, url) = start(test_config()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.shutdown();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "client was not closed");
    }
}
