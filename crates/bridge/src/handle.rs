//! Per-account connection state owned by the router.
//!
//! A [`ConnectorHandle`] wraps one connector together with the rooms it must
//! be in and where it stands in the connection lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting { attempt } -> Connected
//! ```
//!
//! Gateways hold `Arc` clones of the same handle, so a reconnect is visible to
//! every gateway at once.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crossbar_config::{AccountConfig, ReconnectConfig};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{BridgeError, BridgeResult, Capabilities, ChatChannel, Connector, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Backoff schedule for reconnect attempts.
///
/// ```
/// use std::time::Duration;
/// use crossbar_bridge::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(5), Duration::from_secs(60));
/// assert_eq!(policy.delay_for(0), Duration::from_secs(5));
/// assert_eq!(policy.delay_for(1), Duration::from_secs(10));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial: Duration,
    base: Duration,
    max: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial: Duration, base: Duration, max: Duration) -> Self {
        Self { initial, base, max }
    }

    /// Wait before attempt `attempt` (zero based). The first attempt waits the
    /// initial delay, later ones double from the base delay up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial.min(self.max);
        }
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_secs(config.initial_delay_seconds),
            Duration::from_secs(config.base_delay_seconds),
            Duration::from_secs(config.max_delay_seconds),
        )
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

pub struct ConnectorHandle {
    account: String,
    protocol: String,
    config: AccountConfig,
    connector: Arc<dyn Connector>,
    capabilities: Capabilities,
    state: RwLock<ConnectionState>,
    channels: RwLock<BTreeMap<String, ChatChannel>>,
    joined: RwLock<HashSet<String>>,
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("account", &self.account)
            .field("state", &*self.state.read())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl ConnectorHandle {
    pub fn new(config: AccountConfig, connector: Arc<dyn Connector>) -> Self {
        let capabilities = connector.capabilities();
        Self {
            account: config.name.clone(),
            protocol: config.protocol().to_string(),
            config,
            connector,
            capabilities,
            state: RwLock::new(ConnectionState::Disconnected),
            channels: RwLock::new(BTreeMap::new()),
            joined: RwLock::new(HashSet::new()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Register a room this account must be in. A room listed by several
    /// gateways is joined once.
    pub fn add_channel(&self, channel: ChatChannel) {
        self.channels
            .write()
            .entry(channel.id.clone())
            .or_insert(channel);
    }

    pub fn channels(&self) -> Vec<ChatChannel> {
        self.channels.read().values().cloned().collect()
    }

    pub fn joined_count(&self) -> usize {
        self.joined.read().len()
    }

    /// First connection, bounded by `timeout`.
    pub async fn connect(&self, timeout: Duration) -> BridgeResult<()> {
        *self.state.write() = ConnectionState::Connecting;
        info!(account = %self.account, "connecting");

        let result = match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::connect(
                &self.account,
                format!("timed out after {}s", timeout.as_secs()),
            )),
        };

        match result {
            Ok(()) => {
                *self.state.write() = ConnectionState::Connected;
                info!(account = %self.account, "connected");
                Ok(())
            }
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Enter the reconnecting state. Returns `false` when a reconnect is
    /// already running for this account.
    pub fn begin_reconnect(&self) -> bool {
        let mut state = self.state.write();
        if matches!(*state, ConnectionState::Reconnecting { .. }) {
            return false;
        }
        *state = ConnectionState::Reconnecting { attempt: 0 };
        true
    }

    /// One reconnect attempt: drop whatever is left of the old session and
    /// connect again.
    pub async fn reconnect_attempt(&self, attempt: u32) -> BridgeResult<()> {
        *self.state.write() = ConnectionState::Reconnecting { attempt };

        if let Err(err) = self.connector.disconnect().await {
            debug!(account = %self.account, error = %err, "disconnect before reconnect failed");
        }

        self.connector.connect().await?;
        *self.state.write() = ConnectionState::Connected;
        info!(account = %self.account, attempt, "reconnected");
        Ok(())
    }

    /// Forget which rooms were joined so the next [`Self::join_channels`]
    /// joins all of them again.
    pub fn reset_joined(&self) {
        self.joined.write().clear();
    }

    /// Join every registered room not joined yet. Returns the number of rooms
    /// joined by this call.
    pub async fn join_channels(&self) -> BridgeResult<usize> {
        let pending: Vec<ChatChannel> = {
            let joined = self.joined.read();
            self.channels
                .read()
                .values()
                .filter(|channel| !joined.contains(&channel.id))
                .cloned()
                .collect()
        };

        let mut count = 0;
        for channel in pending {
            info!(account = %self.account, channel = %channel.name, "joining channel");
            self.connector.join_channel(&channel).await?;
            self.joined.write().insert(channel.id);
            count += 1;
        }
        Ok(count)
    }

    pub async fn send(&self, message: Message) -> BridgeResult<Option<String>> {
        if !self.is_connected() {
            warn!(
                account = %self.account,
                state = ?self.state(),
                "skipping send while not connected"
            );
            return Err(BridgeError::NotConnected {
                account: self.account.clone(),
            });
        }
        self.connector.send(message).await
    }

    pub async fn disconnect(&self) -> BridgeResult<()> {
        let result = self.connector.disconnect().await;
        *self.state.write() = ConnectionState::Disconnected;
        self.reset_joined();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        joins: AtomicUsize,
        fail_connect: bool,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        fn capabilities(&self) -> Capabilities {
            Capabilities::new()
        }

        async fn connect(&self) -> BridgeResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(BridgeError::connect("test.one", "refused"));
            }
            Ok(())
        }

        async fn disconnect(&self) -> BridgeResult<()> {
            Ok(())
        }

        async fn join_channel(&self, _channel: &ChatChannel) -> BridgeResult<()> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _message: Message) -> BridgeResult<Option<String>> {
            Ok(Some("1".to_string()))
        }
    }

    fn handle(connector: Arc<CountingConnector>) -> ConnectorHandle {
        let config = AccountConfig {
            name: "test.one".to_string(),
            ..Default::default()
        };
        ConnectorHandle::new(config, connector)
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let handle = handle(Arc::new(CountingConnector::default()));
        let err = handle
            .send(Message::new("test.one", "room", "alice", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected { .. }));

        handle.connect(Duration::from_secs(1)).await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Connected);
        let id = handle
            .send(Message::new("test.one", "room", "alice", "hi"))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected() {
        let connector = Arc::new(CountingConnector {
            fail_connect: true,
            ..Default::default()
        });
        let handle = handle(connector);
        assert!(handle.connect(Duration::from_secs(1)).await.is_err());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn rooms_listed_twice_are_joined_once_and_rejoined_after_reset() {
        let connector = Arc::new(CountingConnector::default());
        let handle = handle(connector.clone());
        handle.add_channel(ChatChannel::new("a", "test.one", "room", Direction::InOut));
        handle.add_channel(ChatChannel::new("b", "test.one", "room", Direction::In));
        handle.add_channel(ChatChannel::new("b", "test.one", "other", Direction::Out));

        assert_eq!(handle.join_channels().await.unwrap(), 2);
        assert_eq!(handle.join_channels().await.unwrap(), 0);

        handle.reset_joined();
        assert_eq!(handle.join_channels().await.unwrap(), 2);
        assert_eq!(connector.joins.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn concurrent_reconnects_are_deduplicated() {
        let handle = handle(Arc::new(CountingConnector::default()));
        assert!(handle.begin_reconnect());
        assert!(!handle.begin_reconnect());
        assert_eq!(handle.state(), ConnectionState::Reconnecting { attempt: 0 });
    }
}
