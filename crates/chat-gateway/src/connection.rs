//! Gateway connection driver
//!
//! Owns one shard's socket, timers and channels. Everything that happens is turned
//! into a `ShardInput`, fed to the `ShardMachine`, and the returned actions are
//! executed in order.

use chat_cache::{SessionStore, ShardSession};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::borrow::Cow;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::codec::FrameCodec;
use crate::config::ShardConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::events::ShardEvent;
use crate::heartbeat::HeartbeatTimer;
use crate::identify::IdentifyGate;
use crate::machine::{ShardAction, ShardInput, ShardMachine, ShardState};
use crate::protocol::{GatewayCommand, GatewayFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames allowed per minute on one socket
const SEND_QUOTA: NonZeroU32 = match NonZeroU32::new(120) {
    Some(n) => n,
    None => unreachable!(),
};

/// Buffer for commands submitted through a `ShardHandle`
const COMMAND_BUFFER_SIZE: usize = 64;

/// Resources shared by every shard of one client
#[derive(Clone)]
pub struct ShardContext {
    pub store: Arc<dyn SessionStore>,
    pub gate: Arc<IdentifyGate>,
    pub events: mpsc::Sender<ShardEvent>,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ShardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardContext")
            .field("gate", &self.gate)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Cloneable handle for talking to a running shard
#[derive(Debug, Clone)]
pub struct ShardHandle {
    shard_id: u32,
    commands: mpsc::Sender<GatewayCommand>,
    status: watch::Receiver<ShardState>,
}

impl ShardHandle {
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ShardState {
        *self.status.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ShardState> {
        self.status.clone()
    }

    /// Queue a command; it is sent once the shard is ready
    pub async fn send(&self, command: GatewayCommand) -> GatewayResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GatewayError::ShardClosed(self.shard_id))
    }
}

enum Flow {
    Continue,
    Reconnect(Duration),
    Stop,
    Fail(u16),
}

/// Per-socket resources; dropped when the socket goes away
struct Socket {
    sink: SplitSink<WsStream, Message>,
    codec: FrameCodec,
    limiter: DefaultDirectRateLimiter,
    heartbeat: HeartbeatTimer,
    identify: Option<JoinHandle<()>>,
    inputs: mpsc::UnboundedSender<ShardInput>,
}

impl Socket {
    fn new(
        sink: SplitSink<WsStream, Message>,
        inputs: mpsc::UnboundedSender<ShardInput>,
        compress: bool,
    ) -> Self {
        Self {
            sink,
            codec: FrameCodec::new(compress),
            limiter: RateLimiter::direct(Quota::per_minute(SEND_QUOTA)),
            heartbeat: HeartbeatTimer::new(),
            identify: None,
            inputs,
        }
    }

    async fn send(&mut self, shard_id: u32, frame: &GatewayFrame) {
        self.limiter.until_ready().await;

        let message = match FrameCodec::encode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(shard_id, op = %frame.op, error = %e, "Failed to encode frame");
                return;
            }
        };

        if let Err(e) = self.sink.send(message).await {
            // The read half reports the broken socket
            tracing::warn!(shard_id, op = %frame.op, error = %e, "Failed to send frame");
        }
    }

    async fn close(&mut self, shard_id: u32, code: u16) {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: Cow::Borrowed(""),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(shard_id, code, error = %e, "Close frame not sent");
        }
    }

    fn start_heartbeat(&mut self, interval: Duration, first_delay: Duration) {
        let inputs = self.inputs.clone();
        self.heartbeat.start(interval, first_delay, move || {
            inputs.send(ShardInput::HeartbeatTick).is_ok()
        });
    }

    fn await_identify(&mut self, shard_id: u32, gate: Arc<IdentifyGate>, cancel: CancellationToken) {
        if let Some(task) = self.identify.take() {
            task.abort();
        }

        let inputs = self.inputs.clone();
        self.identify = Some(tokio::spawn(async move {
            if gate.acquire(shard_id, &cancel).await.is_ok() {
                let _ = inputs.send(ShardInput::IdentifyPermitted);
            }
        }));
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Some(task) = self.identify.take() {
            task.abort();
        }
    }
}

/// Drives one shard until shutdown or a fatal close
pub struct GatewayConnection {
    config: ShardConfig,
    gateway_url: String,
    context: ShardContext,
    commands: mpsc::Receiver<GatewayCommand>,
    status: watch::Sender<ShardState>,
}

impl GatewayConnection {
    /// Create a connection and the handle used to reach it
    pub fn new(
        config: ShardConfig,
        gateway_url: impl Into<String>,
        context: ShardContext,
    ) -> (Self, ShardHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (status_tx, status_rx) = watch::channel(ShardState::Disconnected);

        let handle = ShardHandle {
            shard_id: config.shard_id,
            commands: command_tx,
            status: status_rx,
        };
        let connection = Self {
            config,
            gateway_url: gateway_url.into(),
            context,
            commands: command_rx,
            status: status_tx,
        };
        (connection, handle)
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    /// Run until the client shuts down (`Ok`) or the gateway closes with a fatal code (`Err`)
    #[tracing::instrument(skip_all, fields(shard_id = self.config.shard_id))]
    pub async fn run(mut self) -> GatewayResult<()> {
        let shard_id = self.shard_id();
        let stored = match self.context.store.get(shard_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(shard_id, error = %e, "Failed to load stored session");
                None
            }
        };
        let mut machine = ShardMachine::new(self.config.clone(), stored);

        loop {
            let url = self.next_url(&mut machine)?;
            self.status.send_replace(machine.state());
            tracing::debug!(shard_id, url = %url, "Connecting to gateway");

            let connected = tokio::select! {
                biased;
                () = self.context.cancel.cancelled() => {
                    return self.shutdown(&mut machine).await;
                }
                result = timeout(self.config.hello_timeout, connect_async(url.as_str())) => result,
            };

            let flow = match connected {
                Ok(Ok((stream, _))) => {
                    tracing::info!(shard_id, "Gateway socket open");
                    self.drive(&mut machine, stream).await
                }
                Ok(Err(e)) => {
                    tracing::warn!(shard_id, error = %e, "Gateway connect failed");
                    self.step(&mut machine, None, ShardInput::ConnectFailed).await
                }
                Err(_) => {
                    tracing::warn!(
                        shard_id,
                        timeout_ms = self.config.hello_timeout.as_millis() as u64,
                        "Gateway handshake timed out"
                    );
                    self.step(&mut machine, None, ShardInput::ConnectFailed).await
                }
            };

            match flow {
                Flow::Reconnect(delay) => {
                    tracing::debug!(shard_id, delay_ms = delay.as_millis() as u64, "Reconnecting");
                    tokio::select! {
                        biased;
                        () = self.context.cancel.cancelled() => {
                            return self.shutdown(&mut machine).await;
                        }
                        () = sleep(delay) => {}
                    }
                }
                Flow::Stop => return Ok(()),
                Flow::Fail(code) => return Err(GatewayError::closed(code)),
                Flow::Continue => {}
            }
        }
    }

    fn next_url(&self, machine: &mut ShardMachine) -> GatewayResult<String> {
        if let Some(resume) = machine.begin_connect() {
            match self.config.connect_url(resume) {
                Ok(url) => return Ok(url),
                Err(e) => {
                    tracing::warn!(shard_id = self.shard_id(), error = %e, "Ignoring resume URL");
                }
            }
        }
        self.config.connect_url(&self.gateway_url)
    }

    async fn shutdown(&mut self, machine: &mut ShardMachine) -> GatewayResult<()> {
        self.step(machine, None, ShardInput::Shutdown).await;
        Ok(())
    }

    /// Serve one socket until the machine asks for something other than `Continue`
    async fn drive(&mut self, machine: &mut ShardMachine, stream: WsStream) -> Flow {
        let shard_id = self.shard_id();
        let (sink, mut stream) = stream.split();
        let (inputs, mut internal) = mpsc::unbounded_channel();
        let mut socket = Socket::new(sink, inputs, self.config.compress);

        let hello_deadline = sleep(self.config.hello_timeout);
        tokio::pin!(hello_deadline);

        let mut input = ShardInput::Connected;
        loop {
            match self.step(machine, Some(&mut socket), input).await {
                Flow::Continue => {}
                flow => return flow,
            }

            // Messages without an input (pings, partial zlib chunks) go back to waiting
            input = loop {
                break tokio::select! {
                    biased;
                    () = self.context.cancel.cancelled() => ShardInput::Shutdown,
                    () = &mut hello_deadline, if machine.state() == ShardState::AwaitingHello => {
                        ShardInput::HelloTimeout
                    }
                    Some(input) = internal.recv() => input,
                    message = stream.next() => match message {
                        Some(Ok(message)) => match read_message(shard_id, &mut socket.codec, &message) {
                            Some(input) => input,
                            None => continue,
                        },
                        Some(Err(e)) => {
                            tracing::warn!(shard_id, error = %e, "Gateway socket error");
                            ShardInput::Closed(None)
                        }
                        None => ShardInput::Closed(None),
                    },
                    Some(command) = self.commands.recv() => ShardInput::Command(command),
                };
            };
        }
    }

    async fn step(
        &mut self,
        machine: &mut ShardMachine,
        socket: Option<&mut Socket>,
        input: ShardInput,
    ) -> Flow {
        let actions = machine.handle(input, Instant::now());
        let flow = self.execute(actions, socket).await;
        self.status.send_replace(machine.state());
        flow
    }

    async fn execute(&mut self, actions: Vec<ShardAction>, mut socket: Option<&mut Socket>) -> Flow {
        let shard_id = self.shard_id();
        let mut flow = Flow::Continue;

        for action in actions {
            match action {
                ShardAction::Send(frame) => {
                    if let Some(socket) = socket.as_deref_mut() {
                        socket.send(shard_id, &frame).await;
                    }
                }
                ShardAction::StartHeartbeat {
                    interval,
                    first_delay,
                } => {
                    if let Some(socket) = socket.as_deref_mut() {
                        tracing::debug!(
                            shard_id,
                            interval_ms = interval.as_millis() as u64,
                            first_delay_ms = first_delay.as_millis() as u64,
                            "Starting heartbeat"
                        );
                        socket.start_heartbeat(interval, first_delay);
                    }
                }
                ShardAction::StopHeartbeat => {
                    if let Some(socket) = socket.as_deref_mut() {
                        socket.heartbeat.stop();
                    }
                }
                ShardAction::AwaitIdentify => {
                    if let Some(socket) = socket.as_deref_mut() {
                        socket.await_identify(
                            shard_id,
                            Arc::clone(&self.context.gate),
                            self.context.cancel.clone(),
                        );
                    }
                }
                ShardAction::Emit(event) => self.emit(event).await,
                ShardAction::StoreSession(session) => self.store_session(&session).await,
                ShardAction::StoreSequence(sequence) => {
                    if let Err(e) = self.context.store.update_sequence(shard_id, sequence).await {
                        tracing::warn!(shard_id, sequence, error = %e, "Failed to store sequence");
                    }
                }
                ShardAction::ClearSession => {
                    if let Err(e) = self.context.store.clear(shard_id).await {
                        tracing::warn!(shard_id, error = %e, "Failed to clear session");
                    }
                }
                ShardAction::Close(code) => {
                    if let Some(socket) = socket.as_deref_mut() {
                        socket.close(shard_id, code).await;
                    }
                }
                ShardAction::Reconnect(delay) => flow = Flow::Reconnect(delay),
                ShardAction::Stop => flow = Flow::Stop,
                ShardAction::Fail(code) => flow = Flow::Fail(code),
            }
        }
        flow
    }

    /// Deliver an event, waiting while the receiver is full
    ///
    /// The shard does nothing else while it waits, so a receiver that is never
    /// drained stalls reads and heartbeats.
    async fn emit(&self, event: ShardEvent) {
        let event = match self.context.events.try_send(event) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!(shard_id = self.shard_id(), "Event receiver dropped");
                return;
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    shard_id = self.shard_id(),
                    capacity = self.context.events.max_capacity(),
                    "Event receiver is lagging, shard paused until it drains"
                );
                event
            }
        };

        tokio::select! {
            biased;
            result = self.context.events.send(event) => {
                if result.is_err() {
                    tracing::trace!(shard_id = self.shard_id(), "Event receiver dropped");
                }
            }
            () = self.context.cancel.cancelled() => {}
        }
    }

    async fn store_session(&self, session: &ShardSession) {
        if let Err(e) = self.context.store.set(session).await {
            tracing::warn!(shard_id = self.shard_id(), error = %e, "Failed to store session");
        }
    }
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("shard_id", &self.config.shard_id)
            .field("gateway_url", &self.gateway_url)
            .field("state", &*self.status.borrow())
            .finish()
    }
}

/// Turn a socket message into a machine input; `None` for messages with nothing to do
fn read_message(shard_id: u32, codec: &mut FrameCodec, message: &Message) -> Option<ShardInput> {
    match message {
        Message::Close(frame) => {
            let code = frame.as_ref().map(|f| u16::from(f.code));
            tracing::debug!(shard_id, code = ?code, "Close frame received");
            Some(ShardInput::Closed(code))
        }
        Message::Text(_) | Message::Binary(_) => match codec.decode(message) {
            Ok(Some(frame)) => Some(ShardInput::Frame(frame)),
            Ok(None) => None,
            Err(e) if e.is_stream_corrupt() => Some(ShardInput::StreamCorrupted),
            Err(e) => {
                tracing::warn!(shard_id, error = %e, "Malformed frame dropped");
                None
            }
        },
        _ => None,
    }
}
