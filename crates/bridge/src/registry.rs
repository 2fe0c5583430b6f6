use std::collections::HashMap;
use std::sync::Arc;

use crossbar_config::{AccountConfig, GeneralConfig};
use tokio::sync::mpsc;
use tracing::debug;

use crate::console::ConsoleConnector;
use crate::{BridgeError, BridgeResult, Connector, Message};

/// Everything a connector factory receives.
#[derive(Clone)]
pub struct ConnectorContext {
    pub account: AccountConfig,
    pub general: GeneralConfig,
    /// Shared inbound queue drained by the router.
    pub inbound: mpsc::Sender<Message>,
}

pub type ConnectorFactory =
    Arc<dyn Fn(ConnectorContext) -> BridgeResult<Arc<dyn Connector>> + Send + Sync>;

/// Maps a protocol name (the part of an account before the dot) to a factory.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the connectors shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("console", |context| {
            Ok(Arc::new(ConsoleConnector::new(context)) as Arc<dyn Connector>)
        });
        registry
    }

    pub fn register<F>(&mut self, protocol: impl Into<String>, factory: F)
    where
        F: Fn(ConnectorContext) -> BridgeResult<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        let protocol = protocol.into();
        debug!(protocol = %protocol, "registered connector factory");
        self.factories.insert(protocol, Arc::new(factory));
    }

    pub fn supports(&self, protocol: &str) -> bool {
        self.factories.contains_key(protocol)
    }

    pub fn create(&self, context: ConnectorContext) -> BridgeResult<Arc<dyn Connector>> {
        let protocol = context.account.protocol().to_string();
        let factory = self
            .factories
            .get(&protocol)
            .ok_or_else(|| BridgeError::UnknownProtocol(protocol.clone()))?;
        factory(context)
    }
}
