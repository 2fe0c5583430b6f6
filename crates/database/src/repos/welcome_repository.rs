use crate::entities::ChannelWelcome;
use crate::types::DatabaseResult;
use sqlx::{Row, SqlitePool};

/// Welcome texts keyed by channel identifier.
#[derive(Clone)]
pub struct WelcomeRepository {
    pool: SqlitePool,
}

impl WelcomeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, channel_id: &str) -> DatabaseResult<Option<ChannelWelcome>> {
        let row = sqlx::query(
            "SELECT channel_id, text, updated_at FROM channel_welcome WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ChannelWelcome {
                channel_id: row.try_get("channel_id")?,
                text: row.try_get("text")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    pub async fn set(&self, channel_id: &str, text: &str) -> DatabaseResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO channel_welcome (channel_id, text, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(channel_id) DO UPDATE SET text = excluded.text, updated_at = excluded.updated_at",
        )
        .bind(channel_id)
        .bind(text)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a welcome text existed.
    pub async fn clear(&self, channel_id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query("DELETE FROM channel_welcome WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
