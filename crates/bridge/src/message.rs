//! The uniform message envelope.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parent id handed to connectors when a reply's parent could not be correlated.
pub const PARENT_NOT_FOUND: &str = "msg-parent-not-found";

/// What a message represents. Ordinary chat lines are [`EventKind::Message`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Message,
    Edit,
    Delete,
    /// `/me` style action.
    UserAction,
    JoinLeave,
    /// The sender left the whole network (e.g. an IRC quit); carries no room.
    Quit,
    Typing,
    TopicChange,
    AvatarDownload,
    FileDelete,
    Notice,
    /// Connector lost its connection and asks to be reconnected.
    Failure,
    /// Connector asks for its rooms to be joined again.
    RejoinChannels,
}

impl EventKind {
    /// Control events are consumed by the router and never relayed.
    pub fn is_control(self) -> bool {
        matches!(self, EventKind::Failure | EventKind::RejoinChannels)
    }

    /// Kinds that are meaningful without any body text.
    pub fn may_be_empty(self) -> bool {
        matches!(
            self,
            EventKind::Typing | EventKind::Delete | EventKind::FileDelete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Edit => "edit",
            EventKind::Delete => "delete",
            EventKind::UserAction => "user_action",
            EventKind::JoinLeave => "join_leave",
            EventKind::Quit => "quit",
            EventKind::Typing => "typing",
            EventKind::TopicChange => "topic_change",
            EventKind::AvatarDownload => "avatar_download",
            EventKind::FileDelete => "file_delete",
            EventKind::Notice => "notice",
            EventKind::Failure => "failure",
            EventKind::RejoinChannels => "rejoin_channels",
        }
    }
}

/// A file carried by a message. `data` is only present between the source
/// connector and the media relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(skip)]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub size: u64,
}

/// A file the source network refused to hand over (usually too large).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extras {
    #[serde(default)]
    pub files: Vec<FileInfo>,
    /// Network specific attachments passed through untouched.
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub failures: Vec<FileFailure>,
}

impl Extras {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.attachments.is_empty() && self.failures.is_empty()
    }

    pub fn strip_media(&mut self) {
        self.files.clear();
        self.attachments.clear();
    }
}

/// Uniform envelope for everything a connector receives or sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Network account, `protocol.name`.
    pub account: String,
    /// Room name on the network; empty for network-wide events.
    pub channel: String,
    /// Native message id; empty when the network has none (typing, joins).
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parent_id: String,
    pub username: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub event: EventKind,
    #[serde(default)]
    pub extra: Extras,
    /// Explicit gateway tag; a tagged message is only relayed by that gateway.
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a plain text message originating from `account`/`channel`.
    pub fn new(
        account: impl Into<String>,
        channel: impl Into<String>,
        username: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let account = account.into();
        let protocol = account
            .split_once('.')
            .map(|(protocol, _)| protocol.to_string())
            .unwrap_or_default();
        Self {
            account,
            channel: channel.into(),
            username: username.into(),
            text: text.into(),
            protocol,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    /// A control event addressed to the router on behalf of `account`.
    pub fn control(account: impl Into<String>, event: EventKind) -> Self {
        Self::new(account, "", "", "").with_event(event)
    }

    /// The identifier of the channel this message came from.
    pub fn channel_id(&self) -> String {
        crate::channel::channel_id(&self.channel, &self.account)
    }

    /// Events that address every room of an account rather than one room.
    pub fn is_domain_wide(&self) -> bool {
        match self.event {
            EventKind::Quit => true,
            EventKind::JoinLeave => self.channel.is_empty(),
            _ => false,
        }
    }

    /// A parent id that points at a real message.
    pub fn parent_valid(&self) -> bool {
        !self.parent_id.is_empty() && self.parent_id != PARENT_NOT_FOUND
    }
}
