//! Bot token handling
//!
//! The raw token is sent bare in gateway IDENTIFY/RESUME and with a `Bot ` prefix in
//! the REST `Authorization` header. Debug output never shows the secret.

use std::fmt;

const BOT_PREFIX: &str = "Bot ";

/// Bot authentication token
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    /// Create a token, stripping surrounding whitespace and an optional `Bot ` prefix
    pub fn new(raw: impl AsRef<str>) -> Result<Self, TokenError> {
        let trimmed = raw.as_ref().trim_start();
        let bare = match trimmed.strip_prefix(BOT_PREFIX.trim_end()) {
            // "Bot" alone, or followed by whitespace, is the scheme and not the token
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
            _ => trimmed,
        }
        .trim();

        if bare.is_empty() {
            return Err(TokenError::Empty);
        }
        if bare.chars().any(char::is_whitespace) {
            return Err(TokenError::Whitespace);
        }

        Ok(Self(bare.to_string()))
    }

    /// Bare token as sent over the gateway
    #[inline]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value for the REST `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("{BOT_PREFIX}{}", self.0)
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

/// Token validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token is empty")]
    Empty,

    #[error("Token contains whitespace")]
    Whitespace,
}
