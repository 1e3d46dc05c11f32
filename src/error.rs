//! Error types for the wallet connect adapter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error object returned by the remote wallet inside a response.
///
/// Wallet implementations disagree on which code means what, so callers are
/// expected to treat every code the same way ("the operation failed").
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Adapter error type
#[derive(Error, Debug)]
pub enum NwcError {
    /// Bad connection string, missing wallet commands, network mismatch
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The wallet answered with an error object
    #[error("Wallet error: {0}")]
    Protocol(RemoteError),

    /// The per-operation deadline elapsed
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Relay connection failed or dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Notification stream ended before a matching event arrived
    #[error("Notification stream ended")]
    StreamEnded,

    /// Operation is not offered by a wallet connect wallet
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// BOLT11 string could not be decoded
    #[error("Invalid invoice: {0}")]
    InvalidInvoice(String),

    /// Response did not match the request it answered
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Polling listener stopped after an error
    #[error("Listener stopped: {0}")]
    ListenerStopped(String),

    /// Listener was already disposed
    #[error("Listener disposed")]
    Disposed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl NwcError {
    /// True for the linked-deadline outcomes (timeout or caller cancellation).
    pub fn is_deadline(&self) -> bool {
        matches!(self, NwcError::Timeout(_) | NwcError::Cancelled)
    }
}

impl From<RemoteError> for NwcError {
    fn from(err: RemoteError) -> Self {
        NwcError::Protocol(err)
    }
}

/// Adapter result type
pub type Result<T> = std::result::Result<T, NwcError>;
