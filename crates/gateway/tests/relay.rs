use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbar_bridge::{
    channel_id, BridgeError, BridgeResult, Capabilities, Capability, ChatChannel, Connector,
    ConnectorHandle, EventKind, FileInfo, Message, PARENT_NOT_FOUND,
};
use crossbar_commands::{MemoryPreferenceStore, PreferenceStore, UserPreference};
use crossbar_config::{
    AccountConfig, AppConfig, ChannelMemberConfig, ChannelOptions, GatewayConfig, GeneralConfig,
};
use crossbar_database::{initialize_database, CorrelationRepository, DatabaseError};
use crossbar_gateway::{
    CorrelationError, CorrelationResult, CorrelationStore, Destination, DurableCorrelationStore,
    Gateway, MemoryCorrelationStore, MessageKey, Topology, TranslateResult, Translator,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Records everything it is asked to send and hands back sequential ids.
struct FakeNetwork {
    capabilities: Capabilities,
    next_id: AtomicU64,
    sent: Mutex<Vec<Message>>,
    refuse_sends: AtomicBool,
}

impl FakeNetwork {
    fn new(capabilities: Capabilities, first_id: u64) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            next_id: AtomicU64::new(first_id),
            sent: Mutex::new(Vec::new()),
            refuse_sends: AtomicBool::new(false),
        })
    }

    /// A network whose every send fails.
    fn refusing() -> Arc<Self> {
        let network = Self::new(Capabilities::new(), 1);
        network.refuse_sends.store(true, Ordering::SeqCst);
        network
    }

    fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeNetwork {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn connect(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn join_channel(&self, _channel: &ChatChannel) -> BridgeResult<()> {
        Ok(())
    }

    async fn send(&self, message: Message) -> BridgeResult<Option<String>> {
        if self.refuse_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::send(&message.account, "rate limited"));
        }
        self.sent.lock().push(message);
        Ok(Some(self.next_id.fetch_add(1, Ordering::SeqCst).to_string()))
    }
}

fn member(account: &str, channel: &str) -> ChannelMemberConfig {
    ChannelMemberConfig {
        account: account.to_string(),
        channel: channel.to_string(),
        ..Default::default()
    }
}

fn gateway_config(name: &str, inout: Vec<ChannelMemberConfig>) -> GatewayConfig {
    GatewayConfig {
        name: name.to_string(),
        enable: true,
        admins: Vec::new(),
        inbound: Vec::new(),
        out: Vec::new(),
        inout,
    }
}

fn irc_telegram_config() -> AppConfig {
    AppConfig {
        general: GeneralConfig {
            preserve_threading: true,
            ..Default::default()
        },
        accounts: vec![
            AccountConfig {
                name: "irc.net".to_string(),
                ..Default::default()
            },
            AccountConfig {
                name: "tg.net".to_string(),
                ..Default::default()
            },
        ],
        gateways: vec![gateway_config(
            "main",
            vec![member("irc.net", "#main"), member("tg.net", "-100")],
        )],
        ..Default::default()
    }
}

struct Harness {
    gateway: Gateway,
    irc: Arc<FakeNetwork>,
    tg: Arc<FakeNetwork>,
}

async fn connected(config: &AppConfig, account: &str, network: Arc<FakeNetwork>) -> Arc<ConnectorHandle> {
    let account = config.account(account).cloned().unwrap();
    let handle = Arc::new(ConnectorHandle::new(account, network));
    handle.connect(Duration::from_secs(1)).await.unwrap();
    handle
}

async fn harness(store: Arc<dyn CorrelationStore>) -> Harness {
    let config = irc_telegram_config();
    let topology = Topology::build(&config).unwrap();
    let gateway = Gateway::new(
        topology.gateway("main").unwrap(),
        topology.accounts.clone(),
        Arc::new(config.general.clone()),
        store,
    );

    let irc = FakeNetwork::new(Capabilities::new(), 9000);
    let tg = FakeNetwork::new(Capabilities::new().with(Capability::Deletes), 555);
    gateway.add_connector(connected(&config, "irc.net", irc.clone()).await);
    gateway.add_connector(connected(&config, "tg.net", tg.clone()).await);
    Harness { gateway, irc, tg }
}

async fn relay_then_delete(store: Arc<dyn CorrelationStore>) {
    let Harness { gateway, irc, tg } = harness(store).await;

    let hello = Message::new("irc.net", "#main", "alice", "hello").with_id("irc-1");
    let report = gateway.relay(&hello).await;
    assert_eq!(report.delivered, 1);
    assert!(report.recorded);
    assert!(irc.sent().is_empty());

    let delete = Message::new("irc.net", "#main", "alice", "")
        .with_id("irc-1")
        .with_event(EventKind::Delete);
    let report = gateway.relay(&delete).await;
    assert_eq!(report.delivered, 1);
    assert!(!report.recorded);

    let sent = tg.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].channel, "-100");
    assert_eq!(sent[1].event, EventKind::Delete);
    assert_eq!(sent[1].id, "555");
}

#[tokio::test]
async fn delete_follows_relayed_message_in_memory() {
    relay_then_delete(Arc::new(MemoryCorrelationStore::default())).await;
}

#[tokio::test]
async fn delete_follows_relayed_message_in_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let config = crossbar_config::DatabaseConfig {
        url: format!("sqlite://{}", temp_dir.path().join("relay.db").display()),
        max_connections: 1,
        ..Default::default()
    };
    let pool = initialize_database(&config).await.unwrap();
    let store = DurableCorrelationStore::new("main", CorrelationRepository::new(pool), 0);
    relay_then_delete(Arc::new(store)).await;
}

#[tokio::test]
async fn reply_on_copy_threads_back_to_origin() {
    let Harness { gateway, irc, tg } = harness(Arc::new(MemoryCorrelationStore::default())).await;

    gateway
        .relay(&Message::new("irc.net", "#main", "alice", "question").with_id("irc-1"))
        .await;

    // tg.net replies to its own copy, 555.
    let reply = Message::new("tg.net", "-100", "bob", "answer")
        .with_id("tg-7")
        .with_parent("555");
    gateway.relay(&reply).await;

    let to_irc = irc.sent();
    assert_eq!(to_irc.len(), 1);
    assert_eq!(to_irc[0].parent_id, "irc-1");
    assert_eq!(to_irc[0].text, "answer");
    assert_eq!(tg.sent().len(), 1);
}

#[tokio::test]
async fn reply_to_unknown_parent_gets_sentinel() {
    let Harness { gateway, irc, .. } = harness(Arc::new(MemoryCorrelationStore::default())).await;

    let reply = Message::new("tg.net", "-100", "bob", "answer")
        .with_id("tg-7")
        .with_parent("does-not-exist");
    gateway.relay(&reply).await;
    assert_eq!(irc.sent()[0].parent_id, PARENT_NOT_FOUND);
}

#[tokio::test]
async fn tagged_message_stays_in_its_gateway() {
    let mut config = irc_telegram_config();
    config.gateways.push(gateway_config(
        "bridge2",
        vec![member("irc.net", "#main"), member("tg.net", "-200")],
    ));
    let topology = Topology::build(&config).unwrap();

    let tg = FakeNetwork::new(Capabilities::new(), 1);
    let irc_handle = connected(&config, "irc.net", FakeNetwork::new(Capabilities::new(), 1)).await;
    let tg_handle = connected(&config, "tg.net", tg.clone()).await;

    let mut gateways = Vec::new();
    for domain in &topology.gateways {
        let gateway = Gateway::new(
            domain,
            topology.accounts.clone(),
            Arc::new(config.general.clone()),
            Arc::new(MemoryCorrelationStore::default()),
        );
        gateway.add_connector(irc_handle.clone());
        gateway.add_connector(tg_handle.clone());
        gateways.push(gateway);
    }

    let mut tagged = Message::new("irc.net", "#main", "alice", "only main").with_id("1");
    tagged.gateway = Some("main".to_string());
    for gateway in &gateways {
        gateway.relay(&tagged).await;
    }

    let sent = tg.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "-100");
}

#[tokio::test]
async fn ignored_nick_is_not_relayed() {
    let mut config = irc_telegram_config();
    config.accounts[0].ignore_nicks = vec!["^bot$".to_string()];
    let topology = Topology::build(&config).unwrap();
    let gateway = Gateway::new(
        topology.gateway("main").unwrap(),
        topology.accounts.clone(),
        Arc::new(config.general.clone()),
        Arc::new(MemoryCorrelationStore::default()),
    );
    let tg = FakeNetwork::new(Capabilities::new(), 1);
    gateway.add_connector(connected(&config, "irc.net", FakeNetwork::new(Capabilities::new(), 1)).await);
    gateway.add_connector(connected(&config, "tg.net", tg.clone()).await);

    let report = gateway
        .relay(&Message::new("irc.net", "#main", "bot", "beep"))
        .await;
    assert!(report.ignored.is_some());
    assert!(tg.sent().is_empty());
}

/// Wraps the memory store and fails lookups for one destination account,
/// or every write when `refuse_writes` is set.
struct FlakyStore {
    inner: Arc<MemoryCorrelationStore>,
    broken_account: String,
    refuse_writes: bool,
}

fn locked() -> CorrelationError {
    CorrelationError::Storage(DatabaseError::QueryError("database is locked".to_string()))
}

#[async_trait]
impl CorrelationStore for FlakyStore {
    async fn record_fanout(
        &self,
        origin: &MessageKey,
        targets: Vec<Destination>,
    ) -> CorrelationResult<()> {
        if self.refuse_writes {
            return Err(locked());
        }
        self.inner.record_fanout(origin, targets).await
    }

    async fn contains(&self, origin: &MessageKey) -> CorrelationResult<bool> {
        self.inner.contains(origin).await
    }

    async fn resolve_destination_id(
        &self,
        origin: &MessageKey,
        dest_account: &str,
        dest_channel: &str,
    ) -> CorrelationResult<Option<String>> {
        if dest_account == self.broken_account {
            return Err(locked());
        }
        self.inner
            .resolve_destination_id(origin, dest_account, dest_channel)
            .await
    }

    async fn resolve_canonical_id(
        &self,
        account: &str,
        native_id: &str,
    ) -> CorrelationResult<Option<MessageKey>> {
        self.inner.resolve_canonical_id(account, native_id).await
    }

    async fn maintain(&self) -> CorrelationResult<u64> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

/// irc.net fans out to aaa.net and zzz.net, in both `main` and `mirror`.
fn three_network_config() -> AppConfig {
    let accounts = ["irc.net", "aaa.net", "zzz.net"]
        .iter()
        .map(|name| AccountConfig {
            name: name.to_string(),
            ..Default::default()
        })
        .collect();
    AppConfig {
        accounts,
        gateways: vec![
            gateway_config(
                "main",
                vec![member("irc.net", "#main"), member("aaa.net", "a1"), member("zzz.net", "z1")],
            ),
            gateway_config(
                "mirror",
                vec![member("irc.net", "#main"), member("aaa.net", "a2"), member("zzz.net", "z2")],
            ),
        ],
        ..Default::default()
    }
}

async fn three_network_gateway(
    config: &AppConfig,
    name: &str,
    store: Arc<dyn CorrelationStore>,
    aaa: Arc<FakeNetwork>,
    zzz: Arc<FakeNetwork>,
) -> Gateway {
    let topology = Topology::build(config).unwrap();
    let gateway = Gateway::new(
        topology.gateway(name).unwrap(),
        topology.accounts.clone(),
        Arc::new(config.general.clone()),
        store,
    );
    gateway.add_connector(connected(config, "irc.net", FakeNetwork::new(Capabilities::new(), 1)).await);
    gateway.add_connector(connected(config, "aaa.net", aaa).await);
    gateway.add_connector(connected(config, "zzz.net", zzz).await);
    gateway
}

#[tokio::test]
async fn store_failure_for_one_destination_spares_the_others() {
    let config = three_network_config();
    let inner = Arc::new(MemoryCorrelationStore::default());
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        broken_account: "aaa.net".to_string(),
        refuse_writes: false,
    });
    let aaa = FakeNetwork::new(Capabilities::new(), 100);
    let zzz = FakeNetwork::new(Capabilities::new(), 700);
    let gateway = three_network_gateway(&config, "main", store, aaa.clone(), zzz.clone()).await;

    let report = gateway
        .relay(&Message::new("irc.net", "#main", "alice", "hello").with_id("m1"))
        .await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert!(report.recorded);
    assert!(aaa.sent().is_empty());
    assert_eq!(zzz.sent().len(), 1);

    // The copy that went out stays correlated for later edits and deletes.
    let resolved = inner
        .resolve_destination_id(&MessageKey::new("irc.net", "m1"), "zzz.net", &channel_id("z1", "zzz.net"))
        .await
        .unwrap();
    assert_eq!(resolved.as_deref(), Some("700"));
}

#[tokio::test]
async fn failed_correlation_write_still_counts_deliveries() {
    let config = three_network_config();
    let store = Arc::new(FlakyStore {
        inner: Arc::new(MemoryCorrelationStore::default()),
        broken_account: String::new(),
        refuse_writes: true,
    });
    let aaa = FakeNetwork::new(Capabilities::new(), 100);
    let zzz = FakeNetwork::new(Capabilities::new(), 700);
    let gateway = three_network_gateway(&config, "main", store, aaa.clone(), zzz.clone()).await;

    let report = gateway
        .relay(&Message::new("irc.net", "#main", "alice", "hello").with_id("m1"))
        .await;
    assert_eq!(report.delivered, 2);
    assert!(!report.recorded);
}

#[tokio::test]
async fn send_failure_is_isolated_per_destination_and_gateway() {
    let config = three_network_config();
    let aaa = FakeNetwork::refusing();
    let zzz = FakeNetwork::new(Capabilities::new(), 700);

    let mut reports = Vec::new();
    for name in ["main", "mirror"] {
        let gateway = three_network_gateway(
            &config,
            name,
            Arc::new(MemoryCorrelationStore::default()),
            aaa.clone(),
            zzz.clone(),
        )
        .await;
        reports.push(
            gateway
                .relay(&Message::new("irc.net", "#main", "alice", "hello").with_id("m1"))
                .await,
        );
    }

    for report in &reports {
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
    }
    let rooms: Vec<String> = zzz.sent().into_iter().map(|m| m.channel).collect();
    assert_eq!(rooms, vec!["z1".to_string(), "z2".to_string()]);
}

#[tokio::test]
async fn media_opt_out_strips_files_but_relays_text() {
    let config = irc_telegram_config();
    let topology = Topology::build(&config).unwrap();
    let preferences = Arc::new(MemoryPreferenceStore::new());
    preferences
        .put(
            "u-alice",
            UserPreference {
                opt_out_media: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let gateway = Gateway::new(
        topology.gateway("main").unwrap(),
        topology.accounts.clone(),
        Arc::new(config.general.clone()),
        Arc::new(MemoryCorrelationStore::default()),
    )
    .with_preferences(preferences);
    let tg = FakeNetwork::new(Capabilities::new(), 1);
    gateway.add_connector(connected(&config, "irc.net", FakeNetwork::new(Capabilities::new(), 1)).await);
    gateway.add_connector(connected(&config, "tg.net", tg.clone()).await);

    let mut message = Message::new("irc.net", "#main", "alice", "look at this").with_id("m1");
    message.user_id = "u-alice".to_string();
    message.extra.files.push(FileInfo {
        name: "cat.png".to_string(),
        url: "https://files.example/cat.png".to_string(),
        ..Default::default()
    });
    let report = gateway.relay(&message).await;
    assert_eq!(report.delivered, 1);

    let sent = tg.sent();
    assert_eq!(sent[0].text, "look at this");
    assert!(sent[0].extra.files.is_empty());
}

/// Prefixes the text with the requested locale.
struct TaggingTranslator;

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, locale: &str) -> TranslateResult<String> {
        Ok(format!("[{locale}] {text}"))
    }
}

#[tokio::test]
async fn translation_follows_each_destination_locale() {
    let mut config = irc_telegram_config();
    config.accounts.push(AccountConfig {
        name: "slack.team".to_string(),
        ..Default::default()
    });
    let mut german = member("tg.net", "-100");
    german.options = ChannelOptions {
        locale: Some("de".to_string()),
        ..Default::default()
    };
    config.gateways = vec![gateway_config(
        "main",
        vec![member("irc.net", "#main"), german, member("slack.team", "general")],
    )];
    let topology = Topology::build(&config).unwrap();
    let gateway = Gateway::new(
        topology.gateway("main").unwrap(),
        topology.accounts.clone(),
        Arc::new(config.general.clone()),
        Arc::new(MemoryCorrelationStore::default()),
    )
    .with_translator(Arc::new(TaggingTranslator));
    let tg = FakeNetwork::new(Capabilities::new(), 1);
    let slack = FakeNetwork::new(Capabilities::new(), 1);
    gateway.add_connector(connected(&config, "irc.net", FakeNetwork::new(Capabilities::new(), 1)).await);
    gateway.add_connector(connected(&config, "tg.net", tg.clone()).await);
    gateway.add_connector(connected(&config, "slack.team", slack.clone()).await);

    gateway
        .relay(&Message::new("irc.net", "#main", "alice", "good morning").with_id("m1"))
        .await;

    assert_eq!(tg.sent()[0].text, "[de] good morning");
    assert_eq!(slack.sent()[0].text, "good morning");
}
