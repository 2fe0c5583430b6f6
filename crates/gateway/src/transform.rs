//! Rendering a message into a destination's conventions.

use std::sync::OnceLock;

use crossbar_bridge::Message;
use crossbar_config::{AccountConfig, GeneralConfig};
use regex::{Captures, Regex};

use crate::topology::AccountRules;

/// Inserted after the first character of `{NOPINGNICK}` so the nick does not
/// highlight its owner on the destination network.
const ZERO_WIDTH_SPACE: char = '\u{200B}';

fn emoji_shortcode() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":([a-z0-9_+\-]+):").ok())
        .as_ref()
}

/// Everything the nick template may refer to.
pub struct NickContext<'a> {
    pub source: &'a AccountRules,
    pub destination: &'a AccountConfig,
    pub general: &'a GeneralConfig,
    pub gateway: &'a str,
    /// A display name the sender chose for themselves.
    pub display_name: Option<&'a str>,
}

/// Render the sender's name for one destination.
pub fn render_username(message: &Message, context: &NickContext<'_>) -> String {
    let mut nick = context
        .display_name
        .unwrap_or(&message.username)
        .to_string();

    if context.general.strip_nick || context.destination.strip_nick {
        nick.retain(|c| c.is_ascii_alphanumeric());
    }

    for (search, replace) in &context.source.replace_nicks {
        nick = search.replace_all(&nick, replace.as_str()).into_owned();
    }

    let template = context
        .destination
        .remote_nick_format
        .as_deref()
        .unwrap_or(&context.general.remote_nick_format);

    let source = &context.source.config;
    let mut rendered = template.to_string();
    if rendered.contains("{NOPINGNICK}") {
        rendered = rendered.replace("{NOPINGNICK}", &no_ping(&nick));
    }
    rendered
        .replace("{BRIDGE}", source.bridge_name())
        .replace("{PROTOCOL}", source.protocol())
        .replace("{GATEWAY}", context.gateway)
        .replace("{LABEL}", &source.label)
        .replace("{NICK}", &nick)
        .replace("{CHANNEL}", &message.channel)
}

fn no_ping(nick: &str) -> String {
    let mut chars = nick.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(nick.len() + ZERO_WIDTH_SPACE.len_utf8());
            out.push(first);
            out.push(ZERO_WIDTH_SPACE);
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

/// Avatar for one destination: an override, the message's own avatar, then
/// the destination's `icon_url`, then the global one. `{NICK}` is filled in.
pub fn render_avatar(
    message: &Message,
    destination: &AccountConfig,
    general: &GeneralConfig,
    avatar_override: Option<&str>,
) -> String {
    if let Some(avatar) = avatar_override.filter(|url| !url.is_empty()) {
        return avatar.to_string();
    }
    if !message.avatar.is_empty() {
        return message.avatar.clone();
    }
    let template = destination
        .icon_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .unwrap_or(&general.icon_url);
    template.replace("{NICK}", &message.username)
}

/// Apply the source account's text rewrites, then expand emoji shortcodes.
pub fn rewrite_text(text: &str, source: &AccountRules) -> String {
    let mut text = text.to_string();
    for (search, replace) in &source.replace_messages {
        text = search.replace_all(&text, replace.as_str()).into_owned();
    }
    expand_emoji(&text)
}

/// `:smile:` → 😄. Unknown shortcodes are left alone.
pub fn expand_emoji(text: &str) -> String {
    let Some(shortcode) = emoji_shortcode().filter(|_| text.contains(':')) else {
        return text.to_string();
    };
    shortcode
        .replace_all(text, |caps: &Captures<'_>| match emojis::get_by_shortcode(&caps[1]) {
            Some(emoji) => emoji.as_str().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
