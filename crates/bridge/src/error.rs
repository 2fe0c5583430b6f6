//! Error types for connectors.

use thiserror::Error;

/// Result type alias for connector operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("connection to {account} failed: {reason}")]
    Connect { account: String, reason: String },

    #[error("{account} is not connected")]
    NotConnected { account: String },

    #[error("joining {channel} on {account} failed: {reason}")]
    Join {
        account: String,
        channel: String,
        reason: String,
    },

    #[error("sending to {account} failed: {reason}")]
    Send { account: String, reason: String },

    #[error("no connector registered for protocol {0}")]
    UnknownProtocol(String),

    #[error("connector configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn connect(account: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            account: account.into(),
            reason: reason.to_string(),
        }
    }

    pub fn send(account: impl Into<String>, reason: impl ToString) -> Self {
        Self::Send {
            account: account.into(),
            reason: reason.to_string(),
        }
    }

    pub fn join(account: impl Into<String>, channel: impl Into<String>, reason: impl ToString) -> Self {
        Self::Join {
            account: account.into(),
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }
}
