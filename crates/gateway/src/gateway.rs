//! One routing domain: picks destinations for a message, shapes a copy for
//! each, sends it and remembers the ids the destinations handed back.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbar_bridge::{
    channel_id, Capability, ChatChannel, ConnectorHandle, EventKind, Message, PARENT_NOT_FOUND,
};
use crossbar_commands::{PreferenceStore, UserPreference};
use crossbar_config::GeneralConfig;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::correlation::{CorrelationStore, Destination, MessageKey};
use crate::error::{CorrelationResult, GatewayResult};
use crate::filter::{allowed_for_destination, ignore_reason, IgnoreReason};
use crate::topology::{AccountRules, GatewayTopology};
use crate::transform::{render_avatar, render_username, rewrite_text, NickContext};
use crate::translate::{translate_guarded, Translator};

/// What happened to one message in one gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Dropped before fan-out, and why.
    pub ignored: Option<IgnoreReason>,
    /// Copies a destination accepted.
    pub delivered: usize,
    /// Destinations where the send failed.
    pub failed: usize,
    /// Destinations filtered out or with nothing to apply.
    pub skipped: usize,
    /// Whether the fan-out was written to the correlation store.
    pub recorded: bool,
}

pub struct Gateway {
    name: String,
    same_channel: bool,
    admins: Vec<String>,
    channels: BTreeMap<String, ChatChannel>,
    connectors: RwLock<BTreeMap<String, Arc<ConnectorHandle>>>,
    rules: BTreeMap<String, Arc<AccountRules>>,
    general: Arc<GeneralConfig>,
    store: Arc<dyn CorrelationStore>,
    translator: Option<Arc<dyn Translator>>,
    preferences: Option<Arc<dyn PreferenceStore>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("name", &self.name)
            .field("channels", &self.channels.len())
            .field("backend", &self.store.backend())
            .finish()
    }
}

/// Room identifier as the topology stores it.
fn normalized_channel_id(account: &str, room: &str) -> String {
    if account.starts_with("irc.") {
        channel_id(&room.to_lowercase(), account)
    } else {
        channel_id(room, account)
    }
}

impl Gateway {
    pub fn new(
        topology: &GatewayTopology,
        rules: BTreeMap<String, Arc<AccountRules>>,
        general: Arc<GeneralConfig>,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            name: topology.name.clone(),
            same_channel: topology.same_channel,
            admins: topology.admins.clone(),
            channels: topology.channels.clone(),
            connectors: RwLock::new(BTreeMap::new()),
            rules,
            general,
            store,
            translator: None,
            preferences: None,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admins(&self) -> &[String] {
        &self.admins
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChatChannel> {
        self.channels.values()
    }

    pub fn store(&self) -> &Arc<dyn CorrelationStore> {
        &self.store
    }

    /// Attach the live handle for an account this gateway references.
    pub fn add_connector(&self, handle: Arc<ConnectorHandle>) {
        self.connectors
            .write()
            .insert(handle.account().to_string(), handle);
    }

    pub fn connector(&self, account: &str) -> Option<Arc<ConnectorHandle>> {
        self.connectors.read().get(account).cloned()
    }

    /// Whether the message's own room belongs to this gateway.
    pub fn has_channel(&self, message: &Message) -> bool {
        self.channels
            .contains_key(&normalized_channel_id(&message.account, &message.channel))
    }

    /// Rooms of `candidate` that should receive `message`.
    pub fn destinations(&self, message: &Message, candidate: &str) -> Vec<ChatChannel> {
        if let Some(tag) = &message.gateway {
            if tag != &self.name {
                return Vec::new();
            }
        }

        if message.is_domain_wide() {
            if candidate == message.account {
                return Vec::new();
            }
            return self
                .channels
                .values()
                .filter(|channel| channel.account == candidate && channel.direction.allows_outbound())
                .cloned()
                .collect();
        }

        let source_id = normalized_channel_id(&message.account, &message.channel);
        let Some(source) = self.channels.get(&source_id) else {
            return Vec::new();
        };
        if !source.direction.allows_inbound() {
            return Vec::new();
        }

        self.channels
            .values()
            .filter(|channel| channel.id != source_id)
            .filter(|channel| {
                if self.same_channel || channel.same_channel {
                    channel.name == source.name
                        && channel.account == candidate
                        && candidate != message.account
                } else {
                    channel.direction.allows_outbound() && channel.account == candidate
                }
            })
            .cloned()
            .collect()
    }

    async fn preference_for(&self, message: &Message) -> Option<UserPreference> {
        let store = self.preferences.as_ref()?;
        if message.user_id.is_empty() {
            return None;
        }
        match store.get(&message.user_id).await {
            Ok(preference) => preference,
            Err(err) => {
                warn!(gateway = %self.name, user = %message.user_id, error = %err, "preference lookup failed");
                None
            }
        }
    }

    /// Relay one inbound message to every destination in this gateway.
    ///
    /// Failures are isolated per destination: a store or send error on one
    /// room is counted in `failed` and the fan-out carries on.
    pub async fn relay(&self, message: &Message) -> RelayReport {
        let mut report = RelayReport::default();

        if let Some(tag) = &message.gateway {
            if tag != &self.name {
                return report;
            }
        }

        let source_rules = self
            .connector(&message.account)
            .and(self.rules.get(&message.account).cloned());
        let preference = self.preference_for(message).await.unwrap_or_default();

        if let Some(reason) = ignore_reason(message, source_rules.as_deref(), preference.opt_out) {
            debug!(gateway = %self.name, account = %message.account, ?reason, "ignoring message");
            report.ignored = Some(reason);
            return report;
        }
        let Some(source_rules) = source_rules else {
            return report;
        };

        let mut message = message.clone();
        message.text = rewrite_text(&message.text, &source_rules);
        message.gateway = Some(self.name.clone());
        if preference.opt_out_media {
            message.extra.strip_media();
        }

        let origin = MessageKey::new(&message.account, &message.id);
        let parent = match self.canonical_parent(&message).await {
            Ok(parent) => parent,
            Err(err) => {
                warn!(gateway = %self.name, parent = %message.parent_id, error = %err, "parent lookup failed");
                None
            }
        };

        let connectors: Vec<Arc<ConnectorHandle>> = self.connectors.read().values().cloned().collect();
        let mut produced = Vec::new();
        for handle in connectors {
            for channel in self.destinations(&message, handle.account()) {
                if !allowed_for_destination(&message, handle.config(), handle.capabilities()) {
                    report.skipped += 1;
                    continue;
                }

                let outgoing = match self
                    .shape(&message, &source_rules, &preference, &origin, parent.as_ref(), &handle, &channel)
                    .await
                {
                    Ok(Some(outgoing)) => outgoing,
                    Ok(None) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(err) => {
                        report.failed += 1;
                        error!(
                            gateway = %self.name,
                            account = %handle.account(),
                            channel = %channel.name,
                            error = %err,
                            "could not prepare message"
                        );
                        continue;
                    }
                };

                if outgoing.event != EventKind::Typing {
                    debug!(
                        gateway = %self.name,
                        from = %message.account,
                        to = %handle.account(),
                        channel = %channel.name,
                        event = outgoing.event.as_str(),
                        "sending"
                    );
                }

                match handle.send(outgoing).await {
                    Ok(native_id) => {
                        report.delivered += 1;
                        if let Some(id) = native_id.filter(|id| !id.is_empty()) {
                            produced.push(Destination::new(handle.account(), id, &channel.id));
                        }
                    }
                    Err(err) => {
                        report.failed += 1;
                        error!(
                            gateway = %self.name,
                            account = %handle.account(),
                            channel = %channel.name,
                            error = %err,
                            "send failed"
                        );
                    }
                }
            }
        }

        report.recorded = self.record(&message, &origin, produced).await;
        report
    }

    /// Store the ids a fan-out produced. Returns whether anything was written.
    async fn record(&self, message: &Message, origin: &MessageKey, produced: Vec<Destination>) -> bool {
        let written = match self.should_record(message, origin).await {
            Ok(false) => return false,
            Ok(true) => self.store.record_fanout(origin, produced).await,
            Err(err) => Err(err),
        };
        match written {
            Ok(()) => true,
            Err(err) => {
                error!(gateway = %self.name, origin = %origin.id, error = %err, "could not record fan-out");
                false
            }
        }
    }

    /// The origin of the message being replied to, when threading is wanted
    /// by anyone.
    async fn canonical_parent(&self, message: &Message) -> GatewayResult<Option<MessageKey>> {
        if !message.parent_valid() {
            return Ok(None);
        }
        let wanted = self.general.preserve_threading
            || self
                .connectors
                .read()
                .values()
                .any(|handle| handle.config().preserve_threading);
        if !wanted {
            return Ok(None);
        }

        let canonical = self
            .store
            .resolve_canonical_id(&message.account, &message.parent_id)
            .await?;
        Ok(Some(canonical.unwrap_or_else(|| {
            MessageKey::new(&message.account, &message.parent_id)
        })))
    }

    /// Build the copy for one destination room. `None` means there is
    /// nothing to apply there.
    #[allow(clippy::too_many_arguments)]
    async fn shape(
        &self,
        message: &Message,
        source: &AccountRules,
        preference: &UserPreference,
        origin: &MessageKey,
        parent: Option<&MessageKey>,
        handle: &ConnectorHandle,
        channel: &ChatChannel,
    ) -> GatewayResult<Option<Message>> {
        let destination = handle.config();
        let mut outgoing = message.clone();
        outgoing.channel = channel.name.clone();

        let nick = NickContext {
            source,
            destination,
            general: &self.general,
            gateway: &self.name,
            display_name: preference.display_name.as_deref(),
        };
        outgoing.username = render_username(message, &nick);
        outgoing.avatar = render_avatar(
            message,
            destination,
            &self.general,
            preference.avatar_url.as_deref(),
        );

        outgoing.id = if origin.id.is_empty() {
            String::new()
        } else {
            self.store
                .resolve_destination_id(origin, handle.account(), &channel.id)
                .await?
                .unwrap_or_default()
        };

        match outgoing.event {
            EventKind::Edit
                if outgoing.id.is_empty() || !handle.capabilities().supports(Capability::Edits) =>
            {
                outgoing.event = EventKind::Message;
                outgoing.id.clear();
            }
            EventKind::Delete | EventKind::FileDelete if outgoing.id.is_empty() => {
                debug!(gateway = %self.name, account = %handle.account(), "no correlated id to delete");
                return Ok(None);
            }
            _ => {}
        }

        outgoing.parent_id = match parent {
            Some(parent)
                if self.general.preserve_threading || destination.preserve_threading =>
            {
                self.resolve_parent(parent, handle.account(), &channel.id).await?
            }
            _ => String::new(),
        };

        if let (Some(translator), Some(locale)) = (&self.translator, channel.options.locale.as_deref()) {
            if matches!(
                outgoing.event,
                EventKind::Message | EventKind::Edit | EventKind::UserAction
            ) {
                outgoing.text = translate_guarded(translator.as_ref(), &outgoing.text, locale).await;
            }
        }

        Ok(Some(outgoing))
    }

    async fn resolve_parent(
        &self,
        parent: &MessageKey,
        account: &str,
        channel_id: &str,
    ) -> GatewayResult<String> {
        if let Some(id) = self
            .store
            .resolve_destination_id(parent, account, channel_id)
            .await?
        {
            return Ok(id);
        }
        if parent.account == account {
            return Ok(parent.id.clone());
        }
        Ok(PARENT_NOT_FOUND.to_string())
    }

    async fn should_record(&self, message: &Message, origin: &MessageKey) -> CorrelationResult<bool> {
        if origin.id.is_empty() {
            return Ok(false);
        }
        Ok(match message.event {
            EventKind::FileDelete => true,
            EventKind::Delete => false,
            _ => !self.store.contains(origin).await?,
        })
    }
}
