use serde::{Deserialize, Serialize};

/// Greeting sent into a channel when someone joins it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelWelcome {
    pub channel_id: String,
    pub text: String,
    pub updated_at: String,
}
