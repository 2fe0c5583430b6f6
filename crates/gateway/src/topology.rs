//! Turns the declared gateways into a normalized routing table.
//!
//! Every `(account, room)` listing becomes one [`ChatChannel`] keyed by
//! `room + account`. A room listed under several directions of the same
//! gateway is widened to `inout`. Rooms of `irc.*` accounts are lowercased so
//! that `#Main` and `#main` are the same record.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crossbar_bridge::{ChatChannel, Direction};
use crossbar_config::{AccountConfig, AppConfig, ChannelMemberConfig};
use regex::Regex;
use tracing::debug;

use crate::error::{RoutingError, RoutingResult};

/// An account's configuration with its patterns compiled.
#[derive(Debug, Clone)]
pub struct AccountRules {
    pub config: AccountConfig,
    pub ignore_nicks: Vec<Regex>,
    pub ignore_messages: Vec<Regex>,
    pub replace_nicks: Vec<(Regex, String)>,
    pub replace_messages: Vec<(Regex, String)>,
}

impl AccountRules {
    pub fn compile(config: &AccountConfig) -> RoutingResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| RoutingError::InvalidPattern {
                account: config.name.clone(),
                pattern: pattern.to_string(),
                source,
            })
        };

        let ignore_nicks = config
            .ignore_nicks
            .iter()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| compile(pattern))
            .collect::<RoutingResult<Vec<_>>>()?;
        let ignore_messages = config
            .ignore_messages
            .iter()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| compile(pattern))
            .collect::<RoutingResult<Vec<_>>>()?;
        let replace_nicks = config
            .replace_nicks
            .iter()
            .map(|(search, replace)| Ok((compile(search)?, replace.clone())))
            .collect::<RoutingResult<Vec<_>>>()?;
        let replace_messages = config
            .replace_messages
            .iter()
            .map(|(search, replace)| Ok((compile(search)?, replace.clone())))
            .collect::<RoutingResult<Vec<_>>>()?;

        Ok(Self {
            config: config.clone(),
            ignore_nicks,
            ignore_messages,
            replace_nicks,
            replace_messages,
        })
    }

    /// Rules for an account with nothing configured beyond its name.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            config: AccountConfig {
                name: name.into(),
                ..Default::default()
            },
            ignore_nicks: Vec::new(),
            ignore_messages: Vec::new(),
            replace_nicks: Vec::new(),
            replace_messages: Vec::new(),
        }
    }
}

/// The record set of one gateway.
#[derive(Debug, Clone)]
pub struct GatewayTopology {
    pub name: String,
    /// Stable user ids allowed to run admin commands in this gateway's rooms.
    pub admins: Vec<String>,
    pub channels: BTreeMap<String, ChatChannel>,
    /// Declared through `[[same_channel_gateways]]`.
    pub same_channel: bool,
}

impl GatewayTopology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admins: Vec::new(),
            channels: BTreeMap::new(),
            same_channel: false,
        }
    }

    /// Add one listing, widening an existing record's direction.
    pub fn map_channel(
        &mut self,
        member: &ChannelMemberConfig,
        direction: Direction,
    ) -> RoutingResult<()> {
        let account = member.account.trim();
        validate_account(account)?;

        let mut room = member.channel.trim().to_string();
        if room.is_empty() {
            return Err(RoutingError::EmptyChannel {
                gateway: self.name.clone(),
                account: account.to_string(),
            });
        }
        if account.starts_with("irc.") {
            room = room.to_lowercase();
        }

        let channel = ChatChannel::new(&self.name, account, room, direction)
            .with_options(member.options.clone());
        match self.channels.get_mut(&channel.id) {
            Some(existing) => {
                existing.direction = existing.direction.widen(direction);
                existing.same_channel |= member.same_channel;
            }
            None => {
                let mut channel = channel;
                channel.same_channel = member.same_channel || self.same_channel;
                self.channels.insert(channel.id.clone(), channel);
            }
        }
        Ok(())
    }

    pub fn accounts(&self) -> BTreeSet<&str> {
        self.channels
            .values()
            .map(|channel| channel.account.as_str())
            .collect()
    }
}

/// The normalized routing table for the whole process.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub gateways: Vec<GatewayTopology>,
    pub accounts: BTreeMap<String, Arc<AccountRules>>,
    /// Gateways where rooms are matched by name across accounts.
    pub same_channel: BTreeSet<String>,
}

impl Topology {
    pub fn build(config: &AppConfig) -> RoutingResult<Self> {
        let mut accounts = BTreeMap::new();
        for account in &config.accounts {
            validate_account(&account.name)?;
            let rules = AccountRules::compile(account)?;
            if accounts
                .insert(account.name.clone(), Arc::new(rules))
                .is_some()
            {
                return Err(RoutingError::DuplicateAccount(account.name.clone()));
            }
        }

        let mut names = HashSet::new();
        let mut gateways = Vec::new();
        let mut same_channel = BTreeSet::new();

        for gateway in &config.gateways {
            let name = claim_name(&mut names, &gateway.name)?;
            if !gateway.enable {
                debug!(gateway = %name, "skipping disabled gateway");
                continue;
            }

            let mut topology = GatewayTopology::new(name);
            topology.admins = gateway.admins.clone();
            for (members, direction) in [
                (&gateway.inbound, Direction::In),
                (&gateway.out, Direction::Out),
                (&gateway.inout, Direction::InOut),
            ] {
                for member in members {
                    topology.map_channel(member, direction)?;
                }
            }
            gateways.push(topology);
        }

        for gateway in &config.same_channel_gateways {
            let name = claim_name(&mut names, &gateway.name)?;
            if !gateway.enable {
                debug!(gateway = %name, "skipping disabled same-channel gateway");
                continue;
            }

            let mut topology = GatewayTopology::new(name);
            topology.same_channel = true;
            for account in &gateway.accounts {
                for channel in &gateway.channels {
                    let member = ChannelMemberConfig {
                        account: account.clone(),
                        channel: channel.clone(),
                        same_channel: true,
                        ..Default::default()
                    };
                    topology.map_channel(&member, Direction::InOut)?;
                }
            }
            same_channel.insert(topology.name.clone());
            gateways.push(topology);
        }

        for gateway in &gateways {
            for account in gateway.accounts() {
                if !accounts.contains_key(account) {
                    return Err(RoutingError::UnknownAccount {
                        gateway: gateway.name.clone(),
                        account: account.to_string(),
                    });
                }
            }
        }

        debug!(
            gateways = gateways.len(),
            accounts = accounts.len(),
            "built routing topology"
        );
        Ok(Self {
            gateways,
            accounts,
            same_channel,
        })
    }

    /// Accounts referenced by at least one enabled gateway.
    pub fn accounts_in_use(&self) -> BTreeSet<&str> {
        self.gateways
            .iter()
            .flat_map(|gateway| gateway.accounts())
            .collect()
    }

    /// Every room `account` takes part in, across gateways.
    pub fn channels_for(&self, account: &str) -> Vec<ChatChannel> {
        self.gateways
            .iter()
            .flat_map(|gateway| gateway.channels.values())
            .filter(|channel| channel.account == account)
            .cloned()
            .collect()
    }

    pub fn gateway(&self, name: &str) -> Option<&GatewayTopology> {
        self.gateways.iter().find(|gateway| gateway.name == name)
    }
}

fn claim_name<'a>(names: &mut HashSet<&'a str>, name: &'a str) -> RoutingResult<&'a str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RoutingError::EmptyGatewayName);
    }
    if !names.insert(name) {
        return Err(RoutingError::DuplicateGateway(name.to_string()));
    }
    Ok(name)
}

fn validate_account(account: &str) -> RoutingResult<()> {
    match account.split_once('.') {
        Some((protocol, name)) if !protocol.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(RoutingError::MalformedAccount(account.to_string())),
    }
}
