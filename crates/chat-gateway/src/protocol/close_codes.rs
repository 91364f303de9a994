//! WebSocket close codes and how a shard recovers from each

use chat_common::ErrorCategory;

/// Close code the client sends when it intends to resume afterwards
///
/// Any code other than 1000/1001 keeps the session alive on the server.
pub const RESUME_CLOSE_CODE: u16 = 4200;

/// Close code for a deliberate shutdown; invalidates the session
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close codes a gateway socket can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    /// A payload arrived before IDENTIFY
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    /// IDENTIFY sent twice on one socket
    AlreadyAuthenticated = 4005,
    /// RESUME carried a sequence the server cannot replay from
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimeout = 4009,
    InvalidShard = 4010,
    /// The bot has outgrown its shard count
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    /// Privileged intents requested without being enabled
    DisallowedIntents = 4014,
}

/// What a shard does after its socket closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Reconnect and RESUME with the stored session
    Resume,
    /// Drop the session, reconnect and IDENTIFY
    Identify,
    /// Stop the shard
    Fatal(ErrorCategory),
}

impl Recovery {
    /// Recovery for a raw close code; codes outside the table resume
    #[must_use]
    pub fn for_code(code: u16) -> Self {
        CloseCode::from_u16(code).map_or(Self::Resume, CloseCode::recovery)
    }

    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl CloseCode {
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn recovery(self) -> Recovery {
        match self {
            Self::UnknownError
            | Self::UnknownOpcode
            | Self::DecodeError
            | Self::SessionTimeout => Recovery::Resume,
            Self::Normal
            | Self::GoingAway
            | Self::NotAuthenticated
            | Self::AlreadyAuthenticated
            | Self::InvalidSequence
            | Self::RateLimited => Recovery::Identify,
            Self::AuthenticationFailed => Recovery::Fatal(ErrorCategory::Authentication),
            Self::ShardingRequired => Recovery::Fatal(ErrorCategory::Capacity),
            Self::InvalidShard
            | Self::InvalidApiVersion
            | Self::InvalidIntents
            | Self::DisallowedIntents => Recovery::Fatal(ErrorCategory::Configuration),
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Normal => "Closed normally",
            Self::GoingAway => "Server going away",
            Self::UnknownError => "Gateway hit an unknown error",
            Self::UnknownOpcode => "Gateway rejected an op code",
            Self::DecodeError => "Gateway could not decode a payload",
            Self::NotAuthenticated => "Payload sent before identifying",
            Self::AuthenticationFailed => "Token rejected",
            Self::AlreadyAuthenticated => "Shard identified twice",
            Self::InvalidSequence => "Resume sequence rejected",
            Self::RateLimited => "Shard sent payloads too fast",
            Self::SessionTimeout => "Session timed out",
            Self::InvalidShard => "Shard id or count rejected",
            Self::ShardingRequired => "More shards required",
            Self::InvalidApiVersion => "Gateway version rejected",
            Self::InvalidIntents => "Intents bitfield rejected",
            Self::DisallowedIntents => "Privileged intents not enabled",
        }
    }
}

/// Human readable description of a raw close code
#[must_use]
pub fn describe(code: u16) -> &'static str {
    CloseCode::from_u16(code).map_or("Unexpected close code", CloseCode::description)
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({self:?}, {})", self.description(), self.as_u16())
    }
}
