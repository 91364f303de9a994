//! Authentication utilities

mod token;

pub use token::{BotToken, TokenError};
