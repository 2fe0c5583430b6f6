use std::collections::HashMap;

use async_trait::async_trait;
use crossbar_database::WelcomeRepository;
use parking_lot::RwLock;

use crate::CommandResult;

/// Welcome texts keyed by channel identifier.
#[async_trait]
pub trait WelcomeStore: Send + Sync {
    async fn get(&self, channel_id: &str) -> CommandResult<Option<String>>;

    async fn set(&self, channel_id: &str, text: &str) -> CommandResult<()>;

    /// Returns whether there was a text to remove.
    async fn clear(&self, channel_id: &str) -> CommandResult<bool>;
}

#[derive(Default)]
pub struct MemoryWelcomeStore {
    texts: RwLock<HashMap<String, String>>,
}

impl MemoryWelcomeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WelcomeStore for MemoryWelcomeStore {
    async fn get(&self, channel_id: &str) -> CommandResult<Option<String>> {
        Ok(self.texts.read().get(channel_id).cloned())
    }

    async fn set(&self, channel_id: &str, text: &str) -> CommandResult<()> {
        self.texts
            .write()
            .insert(channel_id.to_string(), text.to_string());
        Ok(())
    }

    async fn clear(&self, channel_id: &str) -> CommandResult<bool> {
        Ok(self.texts.write().remove(channel_id).is_some())
    }
}

pub struct SqliteWelcomeStore {
    repository: WelcomeRepository,
}

impl SqliteWelcomeStore {
    pub fn new(repository: WelcomeRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl WelcomeStore for SqliteWelcomeStore {
    async fn get(&self, channel_id: &str) -> CommandResult<Option<String>> {
        Ok(self
            .repository
            .find(channel_id)
            .await?
            .map(|welcome| welcome.text))
    }

    async fn set(&self, channel_id: &str, text: &str) -> CommandResult<()> {
        self.repository.set(channel_id, text).await?;
        Ok(())
    }

    async fn clear(&self, channel_id: &str) -> CommandResult<bool> {
        Ok(self.repository.clear(channel_id).await?)
    }
}
