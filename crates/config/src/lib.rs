use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "crossbar.toml",
    "config/crossbar.toml",
    "crates/config/crossbar.toml",
    "../crossbar.toml",
    "../config/crossbar.toml",
    "/etc/crossbar/crossbar.toml",
];

/// Top-level configuration: global relay settings, network accounts and the
/// gateways that link their rooms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,
    #[serde(default)]
    pub same_channel_gateways: Vec<SameChannelGatewayConfig>,
}

impl AppConfig {
    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|account| account.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "GeneralConfig::default_remote_nick_format")]
    pub remote_nick_format: String,
    #[serde(default)]
    pub strip_nick: bool,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub preserve_threading: bool,
    #[serde(default)]
    pub media_server_upload: String,
    #[serde(default)]
    pub media_download_path: String,
    #[serde(default)]
    pub media_server_download: String,
    #[serde(default = "GeneralConfig::default_media_upload_timeout")]
    pub media_upload_timeout_seconds: u64,
    #[serde(default = "GeneralConfig::default_message_cache_size")]
    pub message_cache_size: usize,
    #[serde(default = "GeneralConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "GeneralConfig::default_maintenance_interval")]
    pub maintenance_interval_seconds: u64,
    #[serde(default = "GeneralConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

impl GeneralConfig {
    fn default_remote_nick_format() -> String {
        "[{PROTOCOL}] <{NICK}> ".to_string()
    }

    const fn default_media_upload_timeout() -> u64 {
        5
    }

    const fn default_message_cache_size() -> usize {
        5000
    }

    const fn default_connect_timeout() -> u64 {
        30
    }

    const fn default_maintenance_interval() -> u64 {
        300
    }

    const fn default_queue_capacity() -> usize {
        1024
    }

    /// Whether files should be relayed through a media server before fan-out.
    pub fn media_relay_enabled(&self) -> bool {
        !self.media_server_upload.is_empty() || !self.media_download_path.is_empty()
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            remote_nick_format: Self::default_remote_nick_format(),
            strip_nick: false,
            icon_url: String::new(),
            preserve_threading: false,
            media_server_upload: String::new(),
            media_download_path: String::new(),
            media_server_download: String::new(),
            media_upload_timeout_seconds: Self::default_media_upload_timeout(),
            message_cache_size: Self::default_message_cache_size(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            maintenance_interval_seconds: Self::default_maintenance_interval(),
            queue_capacity: Self::default_queue_capacity(),
            reconnect: ReconnectConfig::default(),
            translation: TranslationConfig::default(),
            commands: CommandsConfig::default(),
        }
    }
}

/// Delays used by the connector supervisor after a connection failure.
///
/// ```
/// use crossbar_config::ReconnectConfig;
///
/// let reconnect = ReconnectConfig::default();
/// assert_eq!(reconnect.initial_delay_seconds, 5);
/// assert_eq!(reconnect.max_delay_seconds, 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "ReconnectConfig::default_initial_delay")]
    pub initial_delay_seconds: u64,
    #[serde(default = "ReconnectConfig::default_base_delay")]
    pub base_delay_seconds: u64,
    #[serde(default = "ReconnectConfig::default_max_delay")]
    pub max_delay_seconds: u64,
}

impl ReconnectConfig {
    const fn default_initial_delay() -> u64 {
        5
    }

    const fn default_base_delay() -> u64 {
        5
    }

    const fn default_max_delay() -> u64 {
        60
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: Self::default_initial_delay(),
            base_delay_seconds: Self::default_base_delay(),
            max_delay_seconds: Self::default_max_delay(),
        }
    }
}

/// Optional machine translation applied per destination room locale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "TranslationConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl TranslationConfig {
    const fn default_request_timeout() -> u64 {
        10
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "CommandsConfig::default_prefix")]
    pub prefix: String,
}

impl CommandsConfig {
    fn default_prefix() -> String {
        "!".to_string()
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            prefix: Self::default_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Keep the correlation window in SQLite instead of memory.
    #[serde(default)]
    pub durable_correlation: bool,
    /// Row cap applied by periodic maintenance; 0 keeps every entry.
    #[serde(default)]
    pub max_correlation_rows: u64,
    #[serde(default)]
    pub persist_preferences: bool,
}

impl DatabaseConfig {
    /// The relay only opens a database when some state is meant to survive restarts.
    pub fn enabled(&self) -> bool {
        self.durable_correlation || self.persist_preferences
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://crossbar.db".to_string(),
            max_connections: 5,
            durable_correlation: false,
            max_correlation_rows: 0,
            persist_preferences: false,
        }
    }
}

/// One connected network account, named `protocol.name` (e.g. `irc.libera`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub remote_nick_format: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub show_join_part: bool,
    #[serde(default)]
    pub show_topic_change: bool,
    #[serde(default)]
    pub strip_nick: bool,
    #[serde(default)]
    pub preserve_threading: bool,
    #[serde(default)]
    pub ignore_nicks: Vec<String>,
    #[serde(default)]
    pub ignore_messages: Vec<String>,
    #[serde(default)]
    pub replace_nicks: Vec<(String, String)>,
    #[serde(default)]
    pub replace_messages: Vec<(String, String)>,
    /// Connector specific settings, passed through untouched.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl AccountConfig {
    pub fn protocol(&self) -> &str {
        self.name.split_once('.').map(|(protocol, _)| protocol).unwrap_or("")
    }

    pub fn bridge_name(&self) -> &str {
        self.name.split_once('.').map(|(_, name)| name).unwrap_or("")
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|value| value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub name: String,
    #[serde(default = "GatewayConfig::default_enable")]
    pub enable: bool,
    /// Stable user ids allowed to run gateway-admin commands.
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default, rename = "in")]
    pub inbound: Vec<ChannelMemberConfig>,
    #[serde(default)]
    pub out: Vec<ChannelMemberConfig>,
    #[serde(default)]
    pub inout: Vec<ChannelMemberConfig>,
}

impl GatewayConfig {
    const fn default_enable() -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMemberConfig {
    pub account: String,
    pub channel: String,
    #[serde(default)]
    pub same_channel: bool,
    #[serde(default)]
    pub options: ChannelOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub locale: Option<String>,
}

/// Shorthand linking every listed room name across every listed account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SameChannelGatewayConfig {
    pub name: String,
    #[serde(default = "GatewayConfig::default_enable")]
    pub enable: bool,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Load the configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use crossbar_config::load;
///
/// std::env::remove_var("CROSSBAR_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert_eq!(config.general.message_cache_size, 5000);
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    if let Ok(path) = std::env::var("CROSSBAR_CONFIG") {
        debug!(path, "loading configuration via CROSSBAR_CONFIG");
        return build(Some(PathBuf::from(path)));
    }

    let fallback = std::env::current_dir().ok().and_then(|cwd| {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists())
    });

    if fallback.is_none() {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    build(fallback)
}

/// Load the configuration from an explicit file, still honouring environment overrides.
pub fn load_from(path: &Path) -> anyhow::Result<AppConfig> {
    build(Some(path.to_path_buf()))
}

fn build(file: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let defaults = GeneralConfig::default();

    let mut builder = config::Config::builder()
        .set_default("general.remote_nick_format", defaults.remote_nick_format)
        .context("unable to register configuration defaults")?
        .set_default(
            "general.message_cache_size",
            i64::try_from(defaults.message_cache_size).unwrap_or(i64::MAX),
        )
        .context("unable to register configuration defaults")?
        .set_default(
            "general.connect_timeout_seconds",
            i64::try_from(defaults.connect_timeout_seconds).unwrap_or(i64::MAX),
        )
        .context("unable to register configuration defaults")?;

    if let Some(path) = file {
        debug!(path = %path.display(), "loading configuration file");
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CROSSBAR")
            .prefix_separator("__")
            .separator("__"),
    );

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.general.message_cache_size == 0 {
        config.general.message_cache_size = GeneralConfig::default_message_cache_size();
    }

    debug!(
        accounts = config.accounts.len(),
        gateways = config.gateways.len(),
        "loaded relay configuration"
    );
    Ok(config)
}
