//! Snowflake IDs
//!
//! The top 42 bits hold milliseconds since 2015-01-01 UTC. Route classification
//! only needs that part; the worker, process and increment bits are ignored.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    /// 2015-01-01 00:00:00 UTC in Unix milliseconds
    pub const EPOCH: u64 = 1_420_070_400_000;

    const TIMESTAMP_SHIFT: u32 = 22;

    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Unix milliseconds at which the ID was minted
    #[inline]
    #[must_use]
    pub const fn created_at_ms(self) -> u64 {
        (self.0 >> Self::TIMESTAMP_SHIFT) + Self::EPOCH
    }

    /// Age relative to `now`; zero when the ID is newer than `now`
    #[must_use]
    pub fn age_at(self, now: SystemTime) -> Duration {
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Duration::from_millis(now_ms.saturating_sub(self.created_at_ms()))
    }

    pub fn parse(s: &str) -> Result<Self, SnowflakeParseError> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| SnowflakeParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a snowflake: {0:?}")]
pub struct SnowflakeParseError(pub String);

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for Snowflake {
    type Err = SnowflakeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Sent as strings on the wire; integers are accepted on input
impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSnowflake<'a> {
    Int(u64),
    #[serde(borrow)]
    Str(Cow<'a, str>),
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawSnowflake::deserialize(deserializer)? {
            RawSnowflake::Int(id) => Ok(Self(id)),
            RawSnowflake::Str(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minted 2016-04-30 11:18:25.796 UTC
    const KNOWN_ID: u64 = 175_928_847_299_117_063;

    #[test]
    fn test_parse() {
        assert_eq!(Snowflake::parse("175928847299117063").unwrap().get(), KNOWN_ID);
        assert!(Snowflake::parse("@me").is_err());
        assert!(Snowflake::parse("-5").is_err());
    }

    #[test]
    fn test_created_at() {
        assert_eq!(Snowflake::new(KNOWN_ID).created_at_ms(), 1_462_015_105_796);
    }

    #[test]
    fn test_age() {
        let id = Snowflake::new(KNOWN_ID);
        let later = UNIX_EPOCH + Duration::from_millis(1_462_015_105_796 + 5_000);
        assert_eq!(id.age_at(later), Duration::from_secs(5));

        let earlier = UNIX_EPOCH + Duration::from_millis(1_000);
        assert_eq!(id.age_at(earlier), Duration::ZERO);
    }

    #[test]
    fn test_json_string_and_integer() {
        let id = Snowflake::new(KNOWN_ID);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"175928847299117063\"");

        let from_str: Snowflake = serde_json::from_str("\"175928847299117063\"").unwrap();
        assert_eq!(from_str, id);
        let from_int: Snowflake = serde_json::from_str("12345").unwrap();
        assert_eq!(from_int.get(), 12345);
        assert!(serde_json::from_str::<Snowflake>("\"abc\"").is_err());
    }
}
