//! Error types for the gateway layer

use crossbar_database::DatabaseError;
use thiserror::Error;

/// Configuration that cannot be turned into a routing table. Always fatal.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("gateway name must not be empty")]
    EmptyGatewayName,

    #[error("gateway {0} is declared more than once")]
    DuplicateGateway(String),

    #[error("account {0} is declared more than once")]
    DuplicateAccount(String),

    #[error("account {0:?} is not of the form protocol.name")]
    MalformedAccount(String),

    #[error("gateway {gateway} lists an empty channel for {account}")]
    EmptyChannel { gateway: String, account: String },

    #[error("gateway {gateway} uses undeclared account {account}")]
    UnknownAccount { gateway: String, account: String },

    #[error("invalid pattern {pattern:?} for {account}: {source}")]
    InvalidPattern {
        account: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("correlation storage failed: {0}")]
    Storage(#[from] DatabaseError),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("file {0} carries no data")]
    MissingData(String),

    #[error("media upload failed: {0}")]
    Upload(#[from] reqwest::Error),

    #[error("media path error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("translation service returned no text")]
    EmptyResponse,
}

/// Failure preparing the copy for one destination.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
pub type CorrelationResult<T> = Result<T, CorrelationError>;
pub type MediaResult<T> = Result<T, MediaError>;
pub type TranslateResult<T> = Result<T, TranslateError>;
pub type GatewayResult<T> = Result<T, GatewayError>;
