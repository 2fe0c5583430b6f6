use crossbar_config::ChannelOptions;
use serde::{Deserialize, Serialize};

/// Relay direction of a room inside one gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    /// The room's messages may be relayed elsewhere.
    pub fn allows_inbound(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    /// Messages from elsewhere may be delivered into the room.
    pub fn allows_outbound(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }

    /// Combine two listings of the same room. `In` and `Out` together become
    /// `InOut`; a listing never narrows an earlier one.
    pub fn widen(self, other: Direction) -> Direction {
        if self == other {
            self
        } else {
            Direction::InOut
        }
    }
}

/// Key of a room in a gateway: the room name followed by the account.
///
/// ```
/// assert_eq!(crossbar_bridge::channel_id("#main", "irc.libera"), "#mainirc.libera");
/// ```
pub fn channel_id(room: &str, account: &str) -> String {
    let mut id = String::with_capacity(room.len() + account.len());
    id.push_str(room);
    id.push_str(account);
    id
}

/// A room on one network account as it takes part in one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChannel {
    pub id: String,
    pub name: String,
    pub account: String,
    pub direction: Direction,
    #[serde(default)]
    pub options: ChannelOptions,
    /// Created from a same-channel gateway listing.
    #[serde(default)]
    pub same_channel: bool,
    pub gateway: String,
}

impl ChatChannel {
    pub fn new(
        gateway: impl Into<String>,
        account: impl Into<String>,
        name: impl Into<String>,
        direction: Direction,
    ) -> Self {
        let account = account.into();
        let name = name.into();
        Self {
            id: channel_id(&name, &account),
            name,
            account,
            direction,
            options: ChannelOptions::default(),
            same_channel: false,
            gateway: gateway.into(),
        }
    }

    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn protocol(&self) -> &str {
        self.account
            .split_once('.')
            .map(|(protocol, _)| protocol)
            .unwrap_or("")
    }
}
