//! Gateway intents bitflags
//!
//! Intents select which groups of dispatch events the gateway delivers to a shard.
//! Privileged intents must also be enabled for the application on the platform side,
//! otherwise the gateway closes the socket with code 4014.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway intent flags sent in IDENTIFY
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS                        = 1 << 0;
        /// Privileged
        const GUILD_MEMBERS                 = 1 << 1;
        const GUILD_MODERATION              = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS     = 1 << 3;
        const GUILD_INTEGRATIONS            = 1 << 4;
        const GUILD_WEBHOOKS                = 1 << 5;
        const GUILD_INVITES                 = 1 << 6;
        const GUILD_VOICE_STATES            = 1 << 7;
        /// Privileged
        const GUILD_PRESENCES               = 1 << 8;
        const GUILD_MESSAGES                = 1 << 9;
        const GUILD_MESSAGE_REACTIONS       = 1 << 10;
        const GUILD_MESSAGE_TYPING          = 1 << 11;
        const DIRECT_MESSAGES               = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS      = 1 << 13;
        const DIRECT_MESSAGE_TYPING         = 1 << 14;
        /// Privileged
        const MESSAGE_CONTENT               = 1 << 15;
        const GUILD_SCHEDULED_EVENTS        = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION     = 1 << 21;

        /// Intents that require explicit approval
        const PRIVILEGED = Self::GUILD_MEMBERS.bits()
            | Self::GUILD_PRESENCES.bits()
            | Self::MESSAGE_CONTENT.bits();
    }
}

/// Error when parsing intents from configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentsParseError {
    #[error("unknown intent: {0}")]
    UnknownIntent(String),
}

impl Intents {
    /// All non-privileged intents
    #[inline]
    pub fn unprivileged() -> Self {
        Self::all().difference(Self::PRIVILEGED)
    }

    /// Whether any privileged intent is requested
    #[inline]
    pub fn is_privileged(&self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }

    /// Parse a decimal bitfield (`"513"`) or a comma-separated list of names
    /// (`"GUILDS,GUILD_MESSAGES"`).
    pub fn parse(s: &str) -> Result<Self, IntentsParseError> {
        let s = s.trim();
        if let Ok(bits) = s.parse::<u64>() {
            return Ok(Self::from_bits_truncate(bits));
        }

        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Self::empty(), |acc, name| {
                Self::from_name(&name.to_ascii_uppercase())
                    .map(|flag| acc | flag)
                    .ok_or_else(|| IntentsParseError::UnknownIntent(name.to_string()))
            })
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::unprivileged()
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

// Sent as a plain integer in IDENTIFY
impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self::from_bits_truncate)
    }
}

impl From<u64> for Intents {
    fn from(bits: u64) -> Self {
        Self::from_bits_truncate(bits)
    }
}
