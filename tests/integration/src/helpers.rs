//! Test helpers for integration tests
//!
//! `MockGateway` accepts WebSocket connections and hands each one to the test as a
//! `MockSocket`, which speaks gateway frames. `MockRest` serves `GET /gateway/bot`
//! and any extra routes a test adds.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use chat_client::{Client, ClientBuilder};
use chat_common::{BotToken, ClientConfig};
use chat_gateway::{GatewayFrame, OpCode, ShardEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::fixtures::{gateway_bot_body, TEST_TOKEN};

/// How long a test waits for anything before failing
pub const WAIT: Duration = Duration::from_secs(10);

/// Scripted gateway server
pub struct MockGateway {
    pub url: String,
    connections: mpsc::UnboundedReceiver<MockSocket>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(socket) = MockSocket::accept(stream).await {
                        let _ = tx.send(socket);
                    }
                });
            }
        });

        Ok(Self {
            url: format!("ws://{addr}"),
            connections,
            _handle: handle,
        })
    }

    /// Wait for the client to open the next socket
    pub async fn next_connection(&mut self) -> Result<MockSocket> {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .context("timed out waiting for a gateway connection")?
            .ok_or_else(|| anyhow!("gateway listener stopped"))
    }
}

/// One accepted client socket
pub struct MockSocket {
    /// Request path and query, e.g. `/?v=10&encoding=json`
    pub uri: String,
    ws: WebSocketStream<TcpStream>,
}

impl MockSocket {
    async fn accept(stream: TcpStream) -> Result<Self> {
        let (uri_tx, uri_rx) = oneshot::channel();
        let capture_uri = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(request.uri().to_string());
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, capture_uri).await?;
        let uri = uri_rx.await.unwrap_or_default();
        Ok(Self { uri, ws })
    }

    pub async fn send(&mut self, frame: &GatewayFrame) -> Result<()> {
        self.ws.send(Message::Text(frame.to_json()?)).await?;
        Ok(())
    }

    /// Send a WebSocket ping, which carries no gateway frame
    pub async fn ping(&mut self) -> Result<()> {
        self.ws.send(Message::Ping(b"keepalive".to_vec())).await?;
        Ok(())
    }

    /// Send HELLO with `interval_ms`
    pub async fn hello(&mut self, interval_ms: u64) -> Result<()> {
        self.send(&GatewayFrame::hello(interval_ms)).await
    }

    /// Next frame from the client
    pub async fn recv(&mut self) -> Result<GatewayFrame> {
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .context("timed out waiting for a client frame")?
                .ok_or_else(|| anyhow!("client closed the socket"))??;
            match message {
                Message::Text(text) => return Ok(GatewayFrame::from_json(&text)?),
                Message::Close(frame) => bail!("client closed the socket: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Next frame with `op`; heartbeats in between are acknowledged
    pub async fn recv_op(&mut self, op: OpCode) -> Result<GatewayFrame> {
        loop {
            let frame = self.recv().await?;
            if frame.op == op {
                return Ok(frame);
            }
            if frame.op == OpCode::Heartbeat {
                self.send(&GatewayFrame::heartbeat_ack()).await?;
            }
        }
    }

    /// Read until the client closes; returns its close code and the frames seen before it
    pub async fn recv_close(&mut self) -> Result<(Option<u16>, Vec<GatewayFrame>)> {
        let mut frames = Vec::new();
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .context("timed out waiting for the client to close")?;
            match message {
                Some(Ok(Message::Text(text))) => frames.push(GatewayFrame::from_json(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    return Ok((frame.map(|f| u16::from(f.code)), frames));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok((None, frames)),
            }
        }
    }

    /// Close with `code`
    pub async fn close(mut self, code: u16) -> Result<()> {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            }))
            .await?;
        // Drain until the client answers the close
        while let Ok(Some(Ok(_))) = tokio::time::timeout(WAIT, self.ws.next()).await {}
        Ok(())
    }
}

/// Mock REST API serving `GET /api/v10/gateway/bot`
pub struct MockRest {
    pub base_url: String,
    pub addr: SocketAddr,
    _handle: JoinHandle<()>,
}

impl MockRest {
    /// Serve gateway info pointing at `gateway_url`
    pub async fn start(gateway_url: &str, shards: u32, remaining: u32) -> Result<Self> {
        let body = gateway_bot_body(gateway_url, shards, remaining);
        Self::start_with(Router::new().route(
            "/api/v10/gateway/bot",
            get(move || async move { Json(body) }),
        ))
        .await
    }

    /// Serve an arbitrary router
    pub async fn start_with(router: Router) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}/api"),
            addr,
            _handle: handle,
        })
    }
}

/// Client configuration pointing at the mock REST API
pub fn test_config(api_base_url: &str) -> Result<ClientConfig> {
    let mut config = ClientConfig::new(BotToken::new(TEST_TOKEN)?);
    config.app.name = "integration".to_string();
    config.rest.api_base_url = api_base_url.to_string();
    config.rest.offset = Duration::ZERO;
    config.gateway.identify_interval = Duration::from_millis(100);
    Ok(config)
}

/// Start a client against `rest`
pub async fn start_client(rest: &MockRest) -> Result<Client> {
    Ok(client_builder(rest)?.start().await?)
}

pub fn client_builder(rest: &MockRest) -> Result<ClientBuilder> {
    Ok(Client::builder(test_config(&rest.base_url)?))
}

/// Wait for the first event matching `predicate`, skipping the rest
pub async fn next_event<F>(events: &mut mpsc::Receiver<ShardEvent>, mut predicate: F) -> Result<ShardEvent>
where
    F: FnMut(&ShardEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .context("timed out waiting for a shard event")?
            .ok_or_else(|| anyhow!("event stream closed"))?;
        if predicate(&event) {
            return Ok(event);
        }
    }
}
