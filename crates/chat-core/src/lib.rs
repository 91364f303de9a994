//! # chat-core
//!
//! Platform primitives shared by every other crate: snowflake IDs, gateway intents
//! and the ordered `Collection` container.
//! This crate has no dependencies on networking or storage.

pub mod collection;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use collection::Collection;
pub use value_objects::{Intents, IntentsParseError, Snowflake, SnowflakeParseError};
