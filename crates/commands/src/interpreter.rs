use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbar_bridge::{EventKind, Message};
use crossbar_config::CommandsConfig;
use tracing::{debug, error, info};

use crate::{CommandError, CommandResult, PreferenceStore, UserPreference, WelcomeStore};

/// Nick used for replies sent by the relay itself.
pub const BOT_NAME: &str = "crossbar";

const RETRY_LATER: &str = "Something went wrong on our side, please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    OptIn,
    OptOut,
    OptOutMedia,
    SetName(String),
    UnsetName,
    SetAvatar(String),
    UnsetAvatar,
    Status,
    SetWelcome(String),
    UnsetWelcome,
}

impl Command {
    /// Parse a message body that starts with `prefix`. Returns `None` for
    /// ordinary chat text, including prefixed words that name no command.
    pub fn parse(prefix: &str, text: &str) -> Option<Self> {
        let body = text.trim().strip_prefix(prefix)?;
        let (name, argument) = match body.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return None;
        }

        let argument = argument.to_string();
        let command = match name.to_ascii_lowercase().as_str() {
            "help" => Command::Help,
            "optin" => Command::OptIn,
            "optout" => Command::OptOut,
            "optout-media" => Command::OptOutMedia,
            "setname" => Command::SetName(argument),
            "unsetname" => Command::UnsetName,
            "setavatar" => Command::SetAvatar(argument),
            "unsetavatar" => Command::UnsetAvatar,
            "status" => Command::Status,
            "setwelcome" => Command::SetWelcome(argument),
            "unsetwelcome" => Command::UnsetWelcome,
            _ => return None,
        };
        Some(command)
    }

    fn is_admin_only(&self) -> bool {
        matches!(self, Command::SetWelcome(_) | Command::UnsetWelcome)
    }
}

/// Answers `!`-prefixed commands typed in any relayed room.
pub struct CommandInterpreter {
    prefix: String,
    preferences: Arc<dyn PreferenceStore>,
    welcomes: Arc<dyn WelcomeStore>,
    admins: HashMap<String, HashSet<String>>,
}

impl CommandInterpreter {
    pub fn new(
        config: &CommandsConfig,
        preferences: Arc<dyn PreferenceStore>,
        welcomes: Arc<dyn WelcomeStore>,
    ) -> Self {
        Self {
            prefix: config.prefix.clone(),
            preferences,
            welcomes,
            admins: HashMap::new(),
        }
    }

    /// Allow `admins` (stable user ids) to run admin commands in `channel_id`.
    pub fn grant_admins<I, S>(&mut self, channel_id: impl Into<String>, admins: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admins
            .entry(channel_id.into())
            .or_default()
            .extend(admins.into_iter().map(Into::into));
    }

    pub fn preferences(&self) -> &Arc<dyn PreferenceStore> {
        &self.preferences
    }

    fn is_admin(&self, message: &Message) -> bool {
        !message.user_id.is_empty()
            && self
                .admins
                .get(&message.channel_id())
                .is_some_and(|admins| admins.contains(&message.user_id))
    }

    /// Handle `message` if it is a command. Returns the reply to send back
    /// to the invoking room; `None` means the message is ordinary chat.
    pub async fn handle(&self, message: &Message) -> Option<Message> {
        if message.event != EventKind::Message {
            return None;
        }
        let command = Command::parse(&self.prefix, &message.text)?;
        debug!(account = %message.account, command = ?command, "running chat command");

        let text = match self.execute(&command, message).await {
            Ok(text) => text,
            Err(CommandError::Storage(err)) => {
                error!(account = %message.account, error = %err, "chat command failed");
                RETRY_LATER.to_string()
            }
            Err(err) => err.to_string(),
        };
        Some(reply_to(message, text))
    }

    /// The welcome text for a join event in a room that has one.
    pub async fn welcome_for(&self, message: &Message) -> Option<Message> {
        if message.event != EventKind::JoinLeave || message.channel.is_empty() {
            return None;
        }
        match self.welcomes.get(&message.channel_id()).await {
            Ok(Some(text)) => Some(reply_to(message, text)),
            Ok(None) => None,
            Err(err) => {
                error!(channel = %message.channel, error = %err, "welcome lookup failed");
                None
            }
        }
    }

    async fn execute(&self, command: &Command, message: &Message) -> CommandResult<String> {
        if command.is_admin_only() && !self.is_admin(message) {
            return Err(CommandError::NotAdmin(match command {
                Command::SetWelcome(_) => "setwelcome",
                _ => "unsetwelcome",
            }));
        }

        match command {
            Command::Help => Ok(self.help()),
            Command::SetWelcome(text) => {
                if text.is_empty() {
                    return Err(CommandError::MissingArgument("setwelcome"));
                }
                self.welcomes.set(&message.channel_id(), text).await?;
                info!(channel = %message.channel, "welcome text updated");
                Ok("Welcome text saved.".to_string())
            }
            Command::UnsetWelcome => {
                if self.welcomes.clear(&message.channel_id()).await? {
                    Ok("Welcome text removed.".to_string())
                } else {
                    Ok("This room has no welcome text.".to_string())
                }
            }
            Command::Status => {
                let user_id = stable_user_id(message)?;
                let preference = self.preferences.get(user_id).await?.unwrap_or_default();
                Ok(describe(&preference))
            }
            _ => {
                let user_id = stable_user_id(message)?;
                let mut preference = self.preferences.get(user_id).await?.unwrap_or_default();
                let reply = apply(command, &mut preference)?;
                self.preferences.put(user_id, preference).await?;
                Ok(reply)
            }
        }
    }

    fn help(&self) -> String {
        let p = &self.prefix;
        format!(
            "Commands: {p}optout (stop relaying your messages), {p}optout-media (relay text only), \
             {p}optin (relay everything again), {p}setname <name>, {p}unsetname, \
             {p}setavatar <url>, {p}unsetavatar, {p}status. \
             Admins: {p}setwelcome <text>, {p}unsetwelcome."
        )
    }
}

fn stable_user_id(message: &Message) -> CommandResult<&str> {
    if message.user_id.is_empty() {
        return Err(CommandError::AnonymousSender);
    }
    Ok(&message.user_id)
}

fn apply(command: &Command, preference: &mut UserPreference) -> CommandResult<String> {
    let reply = match command {
        Command::OptIn => {
            preference.opt_out = false;
            preference.opt_out_media = false;
            "Your messages are relayed again."
        }
        Command::OptOut => {
            preference.opt_out = true;
            "Your messages are no longer relayed."
        }
        Command::OptOutMedia => {
            preference.opt_out_media = true;
            "Your files and attachments are no longer relayed."
        }
        Command::SetName(name) => {
            if name.is_empty() {
                return Err(CommandError::MissingArgument("setname"));
            }
            preference.display_name = Some(name.clone());
            "Display name saved."
        }
        Command::UnsetName => {
            preference.display_name = None;
            "Display name removed."
        }
        Command::SetAvatar(url) => {
            if url.is_empty() {
                return Err(CommandError::MissingArgument("setavatar"));
            }
            preference.avatar_url = Some(url.clone());
            "Avatar saved."
        }
        Command::UnsetAvatar => {
            preference.avatar_url = None;
            "Avatar removed."
        }
        _ => "",
    };
    Ok(reply.to_string())
}

fn describe(preference: &UserPreference) -> String {
    let relay = if preference.opt_out {
        "not relayed"
    } else if preference.opt_out_media {
        "relayed without media"
    } else {
        "relayed"
    };
    let name = preference.display_name.as_deref().unwrap_or("(network nick)");
    let avatar = preference.avatar_url.as_deref().unwrap_or("(network avatar)");
    format!("Your messages are {relay}. Name: {name}. Avatar: {avatar}.")
}

fn reply_to(message: &Message, text: String) -> Message {
    let mut reply = Message::new(&message.account, &message.channel, BOT_NAME, text);
    reply.gateway = message.gateway.clone();
    reply
}
