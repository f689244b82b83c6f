//! Error taxonomy for the chat-completion boundary.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure talking to a provider. None of these are retried by the client.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SDKError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider '{provider}' returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl SDKError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::new(message))
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}
