//! Shard state machine
//!
//! Pure protocol logic: a `ShardInput` goes in, a list of `ShardAction`s comes out.
//! The machine never touches the socket, timers or storage; the connection driver
//! executes the actions and feeds back what happens.

use chat_cache::ShardSession;
use chat_common::ErrorCategory;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::config::ShardConfig;
use crate::events::ShardEvent;
use crate::heartbeat::HeartbeatState;
use crate::protocol::{
    describe, GatewayCommand, GatewayFrame, HelloPayload, IdentifyPayload, OpCode, ReadyPayload,
    Recovery, ResumePayload, NORMAL_CLOSE_CODE, RESUME_CLOSE_CODE,
};

/// Connection state of one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    /// Not connected and not reconnecting
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open, waiting for HELLO
    AwaitingHello,
    /// IDENTIFY pending or sent, waiting for READY
    Identifying,
    /// RESUME sent, waiting for RESUMED
    Resuming,
    /// Session established
    Ready,
    /// Socket gone, waiting to reconnect
    Reconnecting,
}

impl ShardState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
        }
    }

    #[must_use]
    pub const fn is_handshaking(self) -> bool {
        matches!(self, Self::AwaitingHello | Self::Identifying | Self::Resuming)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happened to the shard
#[derive(Debug, Clone, PartialEq)]
pub enum ShardInput {
    /// The socket opened
    Connected,
    /// Opening the socket failed
    ConnectFailed,
    Frame(GatewayFrame),
    HeartbeatTick,
    /// The identify gate let this shard through
    IdentifyPermitted,
    Command(GatewayCommand),
    /// The socket closed; `None` when no close frame was received
    Closed(Option<u16>),
    /// The inflate stream can no longer be decoded
    StreamCorrupted,
    HelloTimeout,
    Shutdown,
}

/// What the driver must do
#[derive(Debug, Clone, PartialEq)]
pub enum ShardAction {
    Send(GatewayFrame),
    StartHeartbeat {
        interval: Duration,
        first_delay: Duration,
    },
    StopHeartbeat,
    /// Wait for the identify gate, then feed `IdentifyPermitted`
    AwaitIdentify,
    Emit(ShardEvent),
    StoreSession(ShardSession),
    StoreSequence(u64),
    ClearSession,
    /// Send a close frame with this code and drop the socket
    Close(u16),
    /// Open a new socket after the delay
    Reconnect(Duration),
    /// Deliberate shutdown finished
    Stop,
    /// Unrecoverable close code
    Fail(u16),
}

/// Protocol state of one shard
#[derive(Debug)]
pub struct ShardMachine {
    config: ShardConfig,
    state: ShardState,
    session: ShardSession,
    heartbeat: HeartbeatState,
    backoff: Backoff,
    queued: VecDeque<GatewayCommand>,
    replayed: u64,
}

impl ShardMachine {
    /// Create a machine, resuming `stored` if it belongs to this shard layout
    #[must_use]
    pub fn new(config: ShardConfig, stored: Option<ShardSession>) -> Self {
        let session = stored
            .filter(|s| s.shard_id == config.shard_id && s.is_resumable(config.shard_count))
            .unwrap_or_else(|| ShardSession::new(config.shard_id, config.shard_count));

        Self {
            backoff: Backoff::new(config.backoff),
            config,
            state: ShardState::Disconnected,
            session,
            heartbeat: HeartbeatState::new(),
            queued: VecDeque::new(),
            replayed: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ShardState {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> &ShardSession {
        &self.session
    }

    #[must_use]
    pub fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }

    #[must_use]
    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    #[must_use]
    pub fn queued_commands(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session.is_resumable(self.config.shard_count)
    }

    fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    /// Enter `Connecting`; returns the resume URL when the next socket should resume
    pub fn begin_connect(&mut self) -> Option<&str> {
        self.state = ShardState::Connecting;
        if self.can_resume() {
            self.session.resume_url.as_deref()
        } else {
            None
        }
    }

    /// Advance the machine
    pub fn handle(&mut self, input: ShardInput, now: Instant) -> Vec<ShardAction> {
        if self.state == ShardState::Disconnected {
            tracing::trace!(shard_id = self.shard_id(), ?input, "Input ignored while disconnected");
            return Vec::new();
        }

        match input {
            ShardInput::Connected => {
                self.state = ShardState::AwaitingHello;
                self.heartbeat.reset();
                self.replayed = 0;
                Vec::new()
            }
            ShardInput::ConnectFailed => {
                let delay = self.backoff.next_delay();
                self.reconnect(None, delay)
            }
            ShardInput::Frame(frame) => self.handle_frame(frame, now),
            ShardInput::HeartbeatTick => self.handle_tick(now),
            ShardInput::IdentifyPermitted => {
                if self.state == ShardState::Identifying {
                    tracing::debug!(shard_id = self.shard_id(), "Sending IDENTIFY");
                    vec![ShardAction::Send(self.identify_frame())]
                } else {
                    Vec::new()
                }
            }
            ShardInput::Command(command) => {
                if self.state == ShardState::Ready {
                    vec![ShardAction::Send(command.to_frame())]
                } else {
                    tracing::debug!(
                        shard_id = self.shard_id(),
                        op = %command.opcode(),
                        state = %self.state,
                        "Command queued until ready"
                    );
                    self.queued.push_back(command);
                    Vec::new()
                }
            }
            ShardInput::Closed(code) => self.handle_close(code),
            ShardInput::StreamCorrupted => {
                tracing::warn!(shard_id = self.shard_id(), "Inflate stream corrupt, reconnecting");
                let delay = self.backoff.next_delay();
                self.reconnect(Some(RESUME_CLOSE_CODE), delay)
            }
            ShardInput::HelloTimeout => {
                if self.state != ShardState::AwaitingHello {
                    return Vec::new();
                }
                tracing::warn!(shard_id = self.shard_id(), "HELLO not received in time");
                let delay = self.backoff.next_delay();
                self.reconnect(Some(RESUME_CLOSE_CODE), delay)
            }
            ShardInput::Shutdown => {
                tracing::info!(shard_id = self.shard_id(), "Shard shutting down");
                self.state = ShardState::Disconnected;
                self.heartbeat.reset();
                // A 1000 close ends the session server side
                vec![
                    ShardAction::StopHeartbeat,
                    self.clear_session(),
                    ShardAction::Close(NORMAL_CLOSE_CODE),
                    ShardAction::Stop,
                ]
            }
        }
    }

    fn handle_frame(&mut self, frame: GatewayFrame, now: Instant) -> Vec<ShardAction> {
        match frame.op {
            OpCode::Hello => self.handle_hello(&frame),
            OpCode::Dispatch => self.handle_dispatch(frame),
            OpCode::Heartbeat => {
                tracing::debug!(shard_id = self.shard_id(), "Heartbeat requested by server");
                self.heartbeat.record_sent(now);
                vec![ShardAction::Send(GatewayFrame::heartbeat(self.session.sequence))]
            }
            OpCode::HeartbeatAck => match self.heartbeat.record_ack(now) {
                Some(latency) => {
                    tracing::trace!(
                        shard_id = self.shard_id(),
                        latency_ms = latency.as_millis() as u64,
                        "Heartbeat acknowledged"
                    );
                    vec![ShardAction::Emit(ShardEvent::HeartbeatAck {
                        shard_id: self.shard_id(),
                        latency,
                    })]
                }
                None => Vec::new(),
            },
            OpCode::Reconnect => {
                tracing::info!(shard_id = self.shard_id(), "Server requested reconnect");
                self.reconnect(Some(RESUME_CLOSE_CODE), Duration::ZERO)
            }
            OpCode::InvalidSession => {
                let resumable = frame.d.as_bool().unwrap_or(false);
                tracing::warn!(shard_id = self.shard_id(), resumable, "Session invalidated");

                let mut actions = Vec::new();
                let close = if resumable {
                    RESUME_CLOSE_CODE
                } else {
                    actions.push(self.clear_session());
                    NORMAL_CLOSE_CODE
                };
                let delay = Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000));
                actions.extend(self.reconnect(Some(close), delay));
                actions
            }
            op => {
                tracing::warn!(shard_id = self.shard_id(), op = %op, "Unexpected op code from server");
                Vec::new()
            }
        }
    }

    fn handle_hello(&mut self, frame: &GatewayFrame) -> Vec<ShardAction> {
        if self.state != ShardState::AwaitingHello {
            tracing::warn!(shard_id = self.shard_id(), state = %self.state, "Unexpected HELLO");
            return Vec::new();
        }

        let hello: HelloPayload = match frame.data() {
            Ok(hello) => hello,
            Err(e) => {
                tracing::warn!(shard_id = self.shard_id(), error = %e, "Malformed HELLO dropped");
                return Vec::new();
            }
        };

        let interval_ms = hello.heartbeat_interval.max(1);
        let interval = Duration::from_millis(interval_ms);
        let first_delay = Duration::from_millis(rand::thread_rng().gen_range(0..interval_ms));
        self.heartbeat.start(interval);

        let mut actions = vec![ShardAction::StartHeartbeat {
            interval,
            first_delay,
        }];

        if self.can_resume() {
            self.state = ShardState::Resuming;
            self.replayed = 0;
            tracing::info!(
                shard_id = self.shard_id(),
                sequence = ?self.session.sequence,
                "Resuming session"
            );
            actions.push(ShardAction::Send(self.resume_frame()));
        } else {
            self.state = ShardState::Identifying;
            actions.push(ShardAction::AwaitIdentify);
        }
        actions
    }

    fn handle_dispatch(&mut self, frame: GatewayFrame) -> Vec<ShardAction> {
        let mut actions = Vec::new();

        if let Some(sequence) = frame.s {
            if self.session.advance_sequence(sequence) && self.session.session_id.is_some() {
                actions.push(ShardAction::StoreSequence(sequence));
            }
        }

        let Some(event) = frame.t else {
            tracing::warn!(shard_id = self.shard_id(), sequence = ?frame.s, "Dispatch without event name dropped");
            return actions;
        };

        let mut established = false;
        match event.as_str() {
            "READY" => match ReadyPayload::deserialize(&frame.d) {
                Ok(ready) => {
                    self.session.session_id = Some(ready.session_id.clone());
                    self.session.resume_url = ready.resume_gateway_url;
                    self.session.updated_at = Utc::now();
                    self.state = ShardState::Ready;
                    self.backoff.reset();
                    established = true;

                    tracing::info!(shard_id = self.shard_id(), session_id = %ready.session_id, "Shard ready");
                    actions.push(ShardAction::StoreSession(self.session.clone()));
                    actions.push(ShardAction::Emit(ShardEvent::Ready {
                        shard_id: self.shard_id(),
                        session_id: ready.session_id,
                    }));
                }
                Err(e) => {
                    tracing::warn!(shard_id = self.shard_id(), error = %e, "Malformed READY");
                }
            },
            "RESUMED" => {
                self.state = ShardState::Ready;
                self.backoff.reset();
                established = true;

                tracing::info!(shard_id = self.shard_id(), replayed = self.replayed, "Session resumed");
                actions.push(ShardAction::StoreSession(self.session.clone()));
                actions.push(ShardAction::Emit(ShardEvent::Resumed {
                    shard_id: self.shard_id(),
                    replayed: self.replayed,
                }));
            }
            _ => {
                if self.state == ShardState::Resuming {
                    self.replayed += 1;
                }
            }
        }

        actions.push(ShardAction::Emit(ShardEvent::Dispatch {
            shard_id: self.shard_id(),
            event,
            sequence: frame.s,
            data: frame.d,
        }));

        if established && !self.queued.is_empty() {
            tracing::debug!(shard_id = self.shard_id(), count = self.queued.len(), "Sending queued commands");
            actions.extend(self.queued.drain(..).map(|c| ShardAction::Send(c.to_frame())));
        }
        actions
    }

    fn handle_tick(&mut self, now: Instant) -> Vec<ShardAction> {
        if !self.heartbeat.is_running() {
            return Vec::new();
        }

        if self.heartbeat.is_awaiting_ack() {
            tracing::warn!(
                shard_id = self.shard_id(),
                "Heartbeat not acknowledged, reconnecting zombie connection"
            );
            return self.reconnect(Some(RESUME_CLOSE_CODE), Duration::ZERO);
        }

        self.heartbeat.record_sent(now);
        tracing::trace!(shard_id = self.shard_id(), sequence = ?self.session.sequence, "Sending heartbeat");
        vec![ShardAction::Send(GatewayFrame::heartbeat(self.session.sequence))]
    }

    fn handle_close(&mut self, code: Option<u16>) -> Vec<ShardAction> {
        let recovery = code.map_or(Recovery::Resume, Recovery::for_code);
        let mut actions = vec![ShardAction::Emit(ShardEvent::Disconnected {
            shard_id: self.shard_id(),
            code,
        })];

        match (recovery, code) {
            (Recovery::Fatal(category), Some(code)) => {
                tracing::error!(
                    shard_id = self.shard_id(),
                    code,
                    category = %category,
                    reason = describe(code),
                    "Gateway closed with unrecoverable code"
                );
                self.state = ShardState::Disconnected;
                self.heartbeat.reset();
                actions.push(ShardAction::StopHeartbeat);
                actions.push(self.fatal_event(code, category));
                actions.push(ShardAction::Fail(code));
                return actions;
            }
            (Recovery::Identify, _) => {
                tracing::info!(shard_id = self.shard_id(), code = ?code, "Socket closed, session dropped");
                actions.push(self.clear_session());
            }
            _ => {
                tracing::info!(shard_id = self.shard_id(), code = ?code, "Socket closed");
            }
        }

        let delay = self.backoff.next_delay();
        actions.extend(self.reconnect(None, delay));
        actions
    }

    fn fatal_event(&self, code: u16, category: ErrorCategory) -> ShardAction {
        ShardAction::Emit(ShardEvent::Fatal {
            shard_id: self.shard_id(),
            code: Some(code),
            category,
            reason: describe(code).to_string(),
        })
    }

    fn reconnect(&mut self, close: Option<u16>, delay: Duration) -> Vec<ShardAction> {
        self.state = ShardState::Reconnecting;
        self.heartbeat.reset();

        let mut actions = vec![ShardAction::StopHeartbeat];
        if let Some(code) = close {
            actions.push(ShardAction::Close(code));
        }
        actions.push(ShardAction::Emit(ShardEvent::Reconnecting {
            shard_id: self.shard_id(),
            resume: self.can_resume(),
        }));
        actions.push(ShardAction::Reconnect(delay));
        actions
    }

    fn clear_session(&mut self) -> ShardAction {
        self.session = ShardSession::new(self.config.shard_id, self.config.shard_count);
        ShardAction::ClearSession
    }

    fn identify_frame(&self) -> GatewayFrame {
        GatewayFrame::identify(&IdentifyPayload {
            token: self.config.token.expose().to_string(),
            properties: self.config.properties.clone(),
            compress: false,
            large_threshold: self.config.large_threshold,
            shard: self.config.shard(),
            intents: self.config.intents,
            presence: self.config.presence.clone(),
        })
    }

    fn resume_frame(&self) -> GatewayFrame {
        GatewayFrame::resume(&ResumePayload {
            token: self.config.token.expose().to_string(),
            session_id: self.session.session_id.clone().unwrap_or_default(),
            seq: self.session.sequence,
        })
    }
}
