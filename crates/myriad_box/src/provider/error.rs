use serde::Serialize;
use thiserror::Error;

/// Why a provider's fetch did not produce a payload.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The fetch task itself failed (for example, it panicked).
    #[error("fetch aborted: {0}")]
    Internal(String),
}

/// Coarse error class stored alongside a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Parse,
    Config,
    Auth,
    Internal,
}

impl FetchError {
    pub fn network(msg: impl Into<String>) -> Self {
        FetchError::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        FetchError::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FetchError::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        FetchError::Auth(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) | FetchError::Timeout | FetchError::Status(_) => {
                ErrorKind::Network
            }
            FetchError::Parse(_) => ErrorKind::Parse,
            FetchError::Config(_) => ErrorKind::Config,
            FetchError::Auth(_) => ErrorKind::Auth,
            FetchError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => FetchError::Auth(format!("HTTP {}", status.as_u16())),
            code => FetchError::Status(code),
        }
    }
}

/// Render a reqwest error with its causes but without the request URL.
///
/// Query strings carry credentials (the weather `key`), and these messages end
/// up in logs and in sensor attributes.
fn describe(e: reqwest::Error) -> String {
    let e = e.without_url();
    let mut message = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::from_status(status)
        } else if e.is_decode() {
            FetchError::Parse(describe(e))
        } else {
            FetchError::Network(describe(e))
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}
