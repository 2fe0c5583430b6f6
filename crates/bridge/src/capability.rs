//! Capability sets advertised by connectors.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Renders avatars that were uploaded through the relay.
    UploadedAvatars,
    /// Network has a distinct notice message type.
    Notices,
    TypingIndicators,
    /// Can edit previously sent messages in place.
    Edits,
    Deletes,
    Threads,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::UploadedAvatars,
        Capability::Notices,
        Capability::TypingIndicators,
        Capability::Edits,
        Capability::Deletes,
        Capability::Threads,
    ];
}

/// ```
/// use crossbar_bridge::{Capabilities, Capability};
///
/// let caps = Capabilities::new().with(Capability::Edits);
/// assert!(caps.supports(Capability::Edits));
/// assert!(!caps.supports(Capability::Deletes));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    set: BTreeSet<Capability>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.set.insert(capability);
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.set.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.set.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            set: iter.into_iter().collect(),
        }
    }
}
