//! Owns every connector and gateway, and drains the shared inbound queue.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crossbar_bridge::{
    ConnectorContext, ConnectorHandle, ConnectorRegistry, EventKind, Message, ReconnectPolicy,
};
use crossbar_commands::CommandInterpreter;
use crossbar_config::AppConfig;
use crossbar_gateway::{CorrelationStore, Gateway, MediaRelay, Topology};
use futures_util::future::{join_all, try_join_all};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RouterError, RouterResult};
use crate::services::RouterServices;
use crate::supervisor;

pub struct Router {
    handles: BTreeMap<String, Arc<ConnectorHandle>>,
    gateways: Vec<Arc<Gateway>>,
    commands: Option<CommandInterpreter>,
    media: Option<MediaRelay>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    maintenance_interval: Duration,
    sender: mpsc::Sender<Message>,
    receiver: Option<mpsc::Receiver<Message>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    /// Create one connector per account in use and one [`Gateway`] per
    /// routing domain. Nothing connects yet.
    pub fn new(
        config: &AppConfig,
        topology: &Topology,
        registry: &ConnectorRegistry,
        services: RouterServices,
    ) -> RouterResult<Self> {
        let general = Arc::new(config.general.clone());
        let (sender, receiver) = mpsc::channel(general.queue_capacity.max(1));

        let mut handles = BTreeMap::new();
        for account in topology.accounts_in_use() {
            let rules = topology
                .accounts
                .get(account)
                .ok_or_else(|| RouterError::UndeclaredAccount {
                    account: account.to_string(),
                })?;
            let context = ConnectorContext {
                account: rules.config.clone(),
                general: config.general.clone(),
                inbound: sender.clone(),
            };
            let connector = registry
                .create(context)
                .map_err(|source| RouterError::Create {
                    account: account.to_string(),
                    source,
                })?;

            let handle = Arc::new(ConnectorHandle::new(rules.config.clone(), connector));
            for channel in topology.channels_for(account) {
                handle.add_channel(channel);
            }
            debug!(account, protocol = handle.protocol(), "created connector");
            handles.insert(account.to_string(), handle);
        }

        let mut commands = general.commands.enable.then(|| {
            CommandInterpreter::new(
                &general.commands,
                services.preferences.clone(),
                services.welcomes.clone(),
            )
        });

        let mut gateways = Vec::with_capacity(topology.gateways.len());
        for domain in &topology.gateways {
            let mut gateway = Gateway::new(
                domain,
                topology.accounts.clone(),
                general.clone(),
                services.correlation.store_for(&domain.name),
            )
            .with_preferences(services.preferences.clone());
            if let Some(translator) = &services.translator {
                gateway = gateway.with_translator(translator.clone());
            }
            for account in domain.accounts() {
                if let Some(handle) = handles.get(account) {
                    gateway.add_connector(handle.clone());
                }
            }

            if let Some(commands) = commands.as_mut() {
                for channel in domain.channels.values() {
                    commands.grant_admins(channel.id.clone(), domain.admins.iter().cloned());
                }
            }

            info!(
                gateway = %domain.name,
                channels = domain.channels.len(),
                backend = services.correlation.name(),
                "gateway ready"
            );
            gateways.push(Arc::new(gateway));
        }

        let media = MediaRelay::from_config(&general)?;

        Ok(Self {
            handles,
            gateways,
            commands,
            media,
            policy: ReconnectPolicy::from(&general.reconnect),
            connect_timeout: Duration::from_secs(general.connect_timeout_seconds.max(1)),
            maintenance_interval: Duration::from_secs(general.maintenance_interval_seconds.max(1)),
            sender,
            receiver: Some(receiver),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sender side of the inbound queue, as handed to every connector.
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.sender.clone()
    }

    pub fn handle(&self, account: &str) -> Option<&Arc<ConnectorHandle>> {
        self.handles.get(account)
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<ConnectorHandle>> {
        self.handles.values()
    }

    pub fn gateways(&self) -> &[Arc<Gateway>] {
        &self.gateways
    }

    /// Connect every connector, then join every room. Any failure is fatal.
    pub async fn start(&self) -> RouterResult<()> {
        let timeout = self.connect_timeout;
        try_join_all(self.handles.values().map(|handle| async move {
            handle
                .connect(timeout)
                .await
                .map_err(|source| RouterError::Connect {
                    account: handle.account().to_string(),
                    source,
                })
        }))
        .await?;

        for handle in self.handles.values() {
            let joined = handle
                .join_channels()
                .await
                .map_err(|source| RouterError::Join {
                    account: handle.account().to_string(),
                    source,
                })?;
            info!(account = %handle.account(), joined, "joined channels");
        }

        info!(
            connectors = self.handles.len(),
            gateways = self.gateways.len(),
            "relay started"
        );
        Ok(())
    }

    /// Dispatch inbound messages in arrival order until `shutdown` resolves,
    /// then disconnect everything.
    pub async fn run<F>(mut self, shutdown: F) -> RouterResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut receiver = self.receiver.take().ok_or(RouterError::AlreadyRunning)?;
        let maintenance = tokio::spawn(supervisor::maintain(
            self.stores(),
            self.maintenance_interval,
        ));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                next = receiver.recv() => match next {
                    Some(message) => self.dispatch(message).await,
                    None => break,
                },
            }
        }

        maintenance.abort();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for (handle, result) in self
            .handles
            .values()
            .zip(join_all(self.handles.values().map(|handle| handle.disconnect())).await)
        {
            if let Err(err) = result {
                warn!(account = %handle.account(), error = %err, "disconnect failed");
            }
        }
        info!("relay stopped");
        Ok(())
    }

    fn stores(&self) -> Vec<(String, Arc<dyn CorrelationStore>)> {
        self.gateways
            .iter()
            .map(|gateway| (gateway.name().to_string(), gateway.store().clone()))
            .collect()
    }

    /// Handle one inbound message.
    pub async fn dispatch(&self, mut message: Message) {
        match message.event {
            EventKind::Failure => {
                self.schedule_reconnect(&message.account);
                return;
            }
            EventKind::RejoinChannels => {
                self.rejoin(&message.account).await;
                return;
            }
            _ => {}
        }

        if let Some(commands) = &self.commands {
            if let Some(reply) = commands.handle(&message).await {
                self.reply(reply).await;
                return;
            }
            if let Some(welcome) = commands.welcome_for(&message).await {
                self.reply(welcome).await;
            }
        }

        if let Some(media) = &self.media {
            if !message.extra.files.is_empty() {
                media.process(&mut message).await;
            }
        }

        for gateway in &self.gateways {
            let report = gateway.relay(&message).await;
            if report.delivered + report.failed > 0 {
                debug!(
                    gateway = %gateway.name(),
                    delivered = report.delivered,
                    failed = report.failed,
                    "relayed"
                );
            }
        }
    }

    fn schedule_reconnect(&self, account: &str) {
        let Some(handle) = self.handles.get(account) else {
            warn!(account, "failure reported by unknown account");
            return;
        };
        if !handle.begin_reconnect() {
            debug!(account, "reconnect already in progress");
            return;
        }

        warn!(account, "connection lost");
        let task = tokio::spawn(supervisor::reconnect(handle.clone(), self.policy));
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    async fn rejoin(&self, account: &str) {
        let Some(handle) = self.handles.get(account) else {
            warn!(account, "rejoin requested by unknown account");
            return;
        };
        handle.reset_joined();
        match handle.join_channels().await {
            Ok(joined) => info!(account, joined, "rejoined channels"),
            Err(err) => error!(account, error = %err, "rejoin failed"),
        }
    }

    async fn reply(&self, reply: Message) {
        let Some(handle) = self.handles.get(&reply.account) else {
            return;
        };
        if let Err(err) = handle.send(reply).await {
            error!(account = %handle.account(), error = %err, "command reply failed");
        }
    }
}
