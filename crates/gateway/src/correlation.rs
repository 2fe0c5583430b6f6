//! Maps a relayed message to the copies it produced in other networks.
//!
//! Edits, deletes and threaded replies arrive carrying the id the *source*
//! network assigned. To re-apply them elsewhere the gateway looks up which id
//! each destination handed back when the original was sent.
//!
//! Two backends sit behind [`CorrelationStore`]: a bounded LRU window kept in
//! memory, and SQLite rows that survive restarts.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use crossbar_database::{CorrelationRepository, CorrelationRow, OriginRef};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CorrelationResult;

/// Capacity used when none (or zero) is configured.
pub const DEFAULT_CAPACITY: usize = 5000;

/// (account, native id) of a message as its network knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub account: String,
    pub id: String,
}

impl MessageKey {
    pub fn new(account: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            id: id.into(),
        }
    }
}

/// One copy produced by a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub account: String,
    pub id: String,
    /// Identifier of the destination channel (`room + account`).
    pub channel_id: String,
}

impl Destination {
    pub fn new(
        account: impl Into<String>,
        id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            id: id.into(),
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Remember the copies of one fan-out. At most one copy per destination
    /// channel is kept; an empty origin id is ignored.
    async fn record_fanout(
        &self,
        origin: &MessageKey,
        targets: Vec<Destination>,
    ) -> CorrelationResult<()>;

    async fn contains(&self, origin: &MessageKey) -> CorrelationResult<bool>;

    /// The id `dest_account` gave the copy of `origin` posted in `dest_channel`.
    async fn resolve_destination_id(
        &self,
        origin: &MessageKey,
        dest_account: &str,
        dest_channel: &str,
    ) -> CorrelationResult<Option<String>>;

    /// The origin a native id belongs to: the id itself when it started a
    /// fan-out, otherwise the origin whose copy it is.
    async fn resolve_canonical_id(
        &self,
        account: &str,
        native_id: &str,
    ) -> CorrelationResult<Option<MessageKey>>;

    /// Periodic upkeep. Returns the number of entries removed.
    async fn maintain(&self) -> CorrelationResult<u64>;

    fn backend(&self) -> &'static str;
}

fn dedup_by_channel(targets: Vec<Destination>) -> Vec<Destination> {
    let mut unique: Vec<Destination> = Vec::with_capacity(targets.len());
    for target in targets {
        if !unique
            .iter()
            .any(|existing| existing.channel_id == target.channel_id)
        {
            unique.push(target);
        }
    }
    unique
}

/// Bounded recency window. Resolving a canonical id scans the whole window,
/// which stays cheap at the default capacity.
pub struct MemoryCorrelationStore {
    cache: Mutex<LruCache<MessageKey, Vec<Destination>>>,
}

impl MemoryCorrelationStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn record_fanout(
        &self,
        origin: &MessageKey,
        targets: Vec<Destination>,
    ) -> CorrelationResult<()> {
        if origin.id.is_empty() {
            return Ok(());
        }
        self.cache.lock().put(origin.clone(), dedup_by_channel(targets));
        Ok(())
    }

    async fn contains(&self, origin: &MessageKey) -> CorrelationResult<bool> {
        Ok(self.cache.lock().contains(origin))
    }

    async fn resolve_destination_id(
        &self,
        origin: &MessageKey,
        dest_account: &str,
        dest_channel: &str,
    ) -> CorrelationResult<Option<String>> {
        let mut cache = self.cache.lock();
        let found = cache.get(origin).and_then(|targets| {
            targets
                .iter()
                .find(|target| target.account == dest_account && target.channel_id == dest_channel)
                .map(|target| target.id.clone())
        });
        Ok(found)
    }

    async fn resolve_canonical_id(
        &self,
        account: &str,
        native_id: &str,
    ) -> CorrelationResult<Option<MessageKey>> {
        let cache = self.cache.lock();
        let key = MessageKey::new(account, native_id);
        if cache.contains(&key) {
            return Ok(Some(key));
        }

        let found = cache.iter().find_map(|(origin, targets)| {
            targets
                .iter()
                .any(|target| target.account == account && target.id == native_id)
                .then(|| origin.clone())
        });
        Ok(found)
    }

    async fn maintain(&self) -> CorrelationResult<u64> {
        // The LRU bound already evicts.
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// SQLite rows scoped to one gateway.
pub struct DurableCorrelationStore {
    gateway: String,
    repository: CorrelationRepository,
    max_rows: u64,
}

impl DurableCorrelationStore {
    /// `max_rows` of zero keeps every entry.
    pub fn new(gateway: impl Into<String>, repository: CorrelationRepository, max_rows: u64) -> Self {
        Self {
            gateway: gateway.into(),
            repository,
            max_rows,
        }
    }
}

fn origin_ref(key: &MessageKey) -> OriginRef {
    OriginRef::new(&key.account, &key.id)
}

#[async_trait]
impl CorrelationStore for DurableCorrelationStore {
    async fn record_fanout(
        &self,
        origin: &MessageKey,
        targets: Vec<Destination>,
    ) -> CorrelationResult<()> {
        if origin.id.is_empty() {
            return Ok(());
        }
        let rows: Vec<CorrelationRow> = dedup_by_channel(targets)
            .into_iter()
            .map(|target| CorrelationRow {
                dest_account: target.account,
                dest_id: target.id,
                dest_channel: target.channel_id,
            })
            .collect();
        self.repository
            .record(&self.gateway, &origin_ref(origin), &rows)
            .await?;
        Ok(())
    }

    async fn contains(&self, origin: &MessageKey) -> CorrelationResult<bool> {
        Ok(self
            .repository
            .contains(&self.gateway, &origin_ref(origin))
            .await?)
    }

    async fn resolve_destination_id(
        &self,
        origin: &MessageKey,
        dest_account: &str,
        dest_channel: &str,
    ) -> CorrelationResult<Option<String>> {
        Ok(self
            .repository
            .find_destination_id(&self.gateway, &origin_ref(origin), dest_account, dest_channel)
            .await?)
    }

    async fn resolve_canonical_id(
        &self,
        account: &str,
        native_id: &str,
    ) -> CorrelationResult<Option<MessageKey>> {
        let origin = self
            .repository
            .canonical(&self.gateway, account, native_id)
            .await?;
        Ok(origin.map(|origin| MessageKey::new(origin.account, origin.id)))
    }

    async fn maintain(&self) -> CorrelationResult<u64> {
        if self.max_rows == 0 {
            return Ok(0);
        }
        let removed = self.repository.trim(&self.gateway, self.max_rows).await?;
        if removed > 0 {
            debug!(gateway = %self.gateway, removed, "trimmed durable correlation window");
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_resolves_only_recorded_destinations() {
        let store = MemoryCorrelationStore::default();
        let k = MessageKey::new("irc.x", "k");
        store
            .record_fanout(&k, vec![Destination::new("slack.y", "y1", "ry")])
            .await
            .unwrap();

        assert_eq!(
            store
                .resolve_destination_id(&k, "slack.y", "ry")
                .await
                .unwrap()
                .as_deref(),
            Some("y1")
        );
        assert_eq!(
            store.resolve_destination_id(&k, "tg.z", "rz").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn empty_origin_id_is_not_recorded() {
        let store = MemoryCorrelationStore::default();
        store
            .record_fanout(
                &MessageKey::new("irc.x", ""),
                vec![Destination::new("slack.y", "y1", "ry")],
            )
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn one_copy_per_destination_channel() {
        let store = MemoryCorrelationStore::default();
        let k = MessageKey::new("irc.x", "k");
        store
            .record_fanout(
                &k,
                vec![
                    Destination::new("slack.y", "first", "ry"),
                    Destination::new("slack.y", "second", "ry"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            store
                .resolve_destination_id(&k, "slack.y", "ry")
                .await
                .unwrap()
                .as_deref(),
            Some("first")
        );
    }

    #[tokio::test]
    async fn canonical_lookup_finds_origin_from_copy() {
        let store = MemoryCorrelationStore::default();
        let k = MessageKey::new("irc.x", "k");
        store
            .record_fanout(&k, vec![Destination::new("tg.z", "555", "-100tg.z")])
            .await
            .unwrap();

        assert_eq!(
            store.resolve_canonical_id("irc.x", "k").await.unwrap(),
            Some(k.clone())
        );
        assert_eq!(
            store.resolve_canonical_id("tg.z", "555").await.unwrap(),
            Some(k)
        );
        assert_eq!(store.resolve_canonical_id("tg.z", "556").await.unwrap(), None);
        // Same id on another account is a different message.
        assert_eq!(store.resolve_canonical_id("slack.y", "555").await.unwrap(), None);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recent() {
        let store = MemoryCorrelationStore::new(2);
        for id in ["a", "b", "c"] {
            store
                .record_fanout(&MessageKey::new("irc.x", id), Vec::new())
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&MessageKey::new("irc.x", "a")).await.unwrap());
        assert!(store.contains(&MessageKey::new("irc.x", "c")).await.unwrap());
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let store = MemoryCorrelationStore::new(0);
        assert_eq!(store.cache.lock().cap().get(), DEFAULT_CAPACITY);
    }
}
