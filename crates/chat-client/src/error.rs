//! Client error type

use chat_cache::SessionStoreError;
use chat_common::{ConfigError, ErrorCategory};
use chat_gateway::GatewayError;
use chat_rest::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Session(#[from] SessionStoreError),
}

impl ClientError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Rest(e) => e.category(),
            Self::Gateway(e) => e.category(),
            Self::Session(e) => e.category(),
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_passes_through() {
        let err = ClientError::from(ConfigError::MissingVar("BOT_TOKEN"));
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = ClientError::from(GatewayError::closed(4004));
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert!(err.is_fatal());

        let err = ClientError::from(RestError::Unauthorized);
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }
}
