//! Gating before and after fan-out.

use crossbar_bridge::{Capabilities, Capability, EventKind, Message};
use crossbar_config::AccountConfig;

use crate::topology::AccountRules;

/// Why a message is not relayed by a gateway at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The source account has no active connector in this gateway.
    NoConnector,
    /// Control events never reach the relay path.
    Control,
    IgnoredNick(String),
    IgnoredText(String),
    /// No body and nothing else to carry.
    Empty,
    /// The sender asked not to be relayed.
    OptedOut,
}

/// Decide whether a message is dropped before fan-out. `source` is `None`
/// when the source account has no connector in the gateway.
pub fn ignore_reason(
    message: &Message,
    source: Option<&AccountRules>,
    opted_out: bool,
) -> Option<IgnoreReason> {
    let Some(source) = source else {
        return Some(IgnoreReason::NoConnector);
    };
    if message.event.is_control() {
        return Some(IgnoreReason::Control);
    }

    if message.text.is_empty() && !message.event.may_be_empty() && message.extra.is_empty() {
        return Some(IgnoreReason::Empty);
    }

    if let Some(pattern) = source
        .ignore_nicks
        .iter()
        .find(|pattern| pattern.is_match(&message.username))
    {
        return Some(IgnoreReason::IgnoredNick(pattern.as_str().to_string()));
    }

    if !message.text.is_empty() {
        if let Some(pattern) = source
            .ignore_messages
            .iter()
            .find(|pattern| pattern.is_match(&message.text))
        {
            return Some(IgnoreReason::IgnoredText(pattern.as_str().to_string()));
        }
    }

    if opted_out {
        return Some(IgnoreReason::OptedOut);
    }
    None
}

/// Whether `destination` (with `capabilities`) should receive `message` at all.
pub fn allowed_for_destination(
    message: &Message,
    destination: &AccountConfig,
    capabilities: &Capabilities,
) -> bool {
    if message.text.is_empty()
        && !message.extra.failures.is_empty()
        && message.extra.files.is_empty()
        && message.extra.attachments.is_empty()
    {
        return false;
    }

    if message.channel.is_empty() && !message.is_domain_wide() {
        return false;
    }

    match message.event {
        EventKind::Message | EventKind::UserAction | EventKind::Edit => true,
        EventKind::Delete | EventKind::FileDelete => capabilities.supports(Capability::Deletes),
        EventKind::AvatarDownload => capabilities.supports(Capability::UploadedAvatars),
        EventKind::JoinLeave | EventKind::Quit => destination.show_join_part,
        EventKind::TopicChange => destination.show_topic_change,
        EventKind::Notice => capabilities.supports(Capability::Notices),
        EventKind::Typing => capabilities.supports(Capability::TypingIndicators),
        EventKind::Failure | EventKind::RejoinChannels => false,
    }
}
