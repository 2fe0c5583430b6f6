//! # Crossbar Bridge Crate
//!
//! The uniform message envelope every connected chat network is translated
//! into, and the contract a network connector implements to take part in the
//! relay.
//!
//! ## Architecture
//!
//! - **Message**: the envelope, its closed set of event kinds and extras
//! - **Channel**: a (network account, room) pair and its relay direction
//! - **Connector**: the async trait a protocol adapter implements
//! - **Capabilities**: what a connector can render, queried by the filter stage
//! - **Registry**: protocol name → connector factory
//! - **Handle**: the per-account connection state machine owned by the router
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crossbar_bridge::{ConnectorContext, ConnectorRegistry};
//!
//! # async fn example(context: ConnectorContext) -> crossbar_bridge::BridgeResult<()> {
//! let registry = ConnectorRegistry::with_builtin();
//! let connector = registry.create(context)?;
//! connector.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod channel;
pub mod connector;
pub mod console;
pub mod error;
pub mod handle;
pub mod message;
pub mod registry;

pub use capability::{Capabilities, Capability};
pub use channel::{channel_id, ChatChannel, Direction};
pub use connector::Connector;
pub use error::{BridgeError, BridgeResult};
pub use handle::{ConnectionState, ConnectorHandle, ReconnectPolicy};
pub use message::{EventKind, Extras, FileFailure, FileInfo, Message, PARENT_NOT_FOUND};
pub use registry::{ConnectorContext, ConnectorFactory, ConnectorRegistry};
