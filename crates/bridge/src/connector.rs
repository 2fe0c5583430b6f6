use async_trait::async_trait;

use crate::{BridgeResult, Capabilities, ChatChannel, Message};

/// A protocol adapter for one network account.
///
/// Connectors push everything they receive into the inbound queue handed to
/// them through [`crate::ConnectorContext`]. Lost connections are reported by
/// pushing a [`crate::EventKind::Failure`] control message rather than by
/// reconnecting themselves.
#[async_trait]
pub trait Connector: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn connect(&self) -> BridgeResult<()>;

    async fn disconnect(&self) -> BridgeResult<()>;

    async fn join_channel(&self, channel: &ChatChannel) -> BridgeResult<()>;

    /// Deliver a message. Returns the network's id for the new (or edited)
    /// message when the network assigns one.
    async fn send(&self, message: Message) -> BridgeResult<Option<String>>;
}
