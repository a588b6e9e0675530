use thiserror::Error;

use super::Phase;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("invalid configuration for '{provider}': {message}")]
    Config { provider: String, message: String },

    #[error("provider '{0}' is not enabled")]
    NotEnabled(String),

    #[error("operation not allowed while coordinator is {0}")]
    InvalidPhase(Phase),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl CoordinatorError {
    pub(super) fn config(provider: &str, message: impl Into<String>) -> Self {
        CoordinatorError::Config {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}
