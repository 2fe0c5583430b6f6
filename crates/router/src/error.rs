//! Error types for the router

use crossbar_bridge::BridgeError;
use crossbar_gateway::{MediaError, RoutingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("account {account} is used by a gateway but not declared")]
    UndeclaredAccount { account: String },

    #[error("failed to create connector for {account}: {source}")]
    Create {
        account: String,
        #[source]
        source: BridgeError,
    },

    #[error("failed to connect {account}: {source}")]
    Connect {
        account: String,
        #[source]
        source: BridgeError,
    },

    #[error("failed to join channels for {account}: {source}")]
    Join {
        account: String,
        #[source]
        source: BridgeError,
    },

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("router is already running")]
    AlreadyRunning,
}

pub type RouterResult<T> = Result<T, RouterError>;
