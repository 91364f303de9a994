//! Value objects - small immutable types shared across the workspace

mod intents;
mod snowflake;

pub use intents::{Intents, IntentsParseError};
pub use snowflake::{Snowflake, SnowflakeParseError};
