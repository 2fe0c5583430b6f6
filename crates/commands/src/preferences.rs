//! Per-user relay preferences and where they are kept.

use std::collections::HashMap;

use async_trait::async_trait;
use crossbar_database::{PreferenceRepository, UserPreferenceRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::CommandResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreference {
    /// Messages from this user are not relayed at all.
    pub opt_out: bool,
    /// Files and attachments are stripped before relay.
    pub opt_out_media: bool,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserPreference {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: &str) -> CommandResult<Option<UserPreference>>;

    async fn put(&self, user_id: &str, preference: UserPreference) -> CommandResult<()>;
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    entries: RwLock<HashMap<String, UserPreference>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, user_id: &str) -> CommandResult<Option<UserPreference>> {
        Ok(self.entries.read().get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, preference: UserPreference) -> CommandResult<()> {
        let mut entries = self.entries.write();
        if preference.is_default() {
            entries.remove(user_id);
        } else {
            entries.insert(user_id.to_string(), preference);
        }
        Ok(())
    }
}

pub struct SqlitePreferenceStore {
    repository: PreferenceRepository,
}

impl SqlitePreferenceStore {
    pub fn new(repository: PreferenceRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferenceStore {
    async fn get(&self, user_id: &str) -> CommandResult<Option<UserPreference>> {
        let record = self.repository.find(user_id).await?;
        Ok(record.map(|record| UserPreference {
            opt_out: record.opt_out,
            opt_out_media: record.opt_out_media,
            display_name: record.display_name,
            avatar_url: record.avatar_url,
        }))
    }

    async fn put(&self, user_id: &str, preference: UserPreference) -> CommandResult<()> {
        let mut record = UserPreferenceRecord::new(user_id);
        record.opt_out = preference.opt_out;
        record.opt_out_media = preference.opt_out_media;
        record.display_name = preference.display_name;
        record.avatar_url = preference.avatar_url;
        self.repository.upsert(&record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_forgets_default_preferences() {
        let store = MemoryPreferenceStore::new();
        store
            .put(
                "U1",
                UserPreference {
                    opt_out: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.get("U1").await.unwrap().unwrap().opt_out);

        store.put("U1", UserPreference::default()).await.unwrap();
        assert_eq!(store.get("U1").await.unwrap(), None);
    }
}
