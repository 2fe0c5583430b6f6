//! Repository for per-user relay preferences.

use crate::entities::UserPreferenceRecord;
use crate::types::DatabaseResult;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct PreferenceRepository {
    pool: SqlitePool,
}

impl PreferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, user_id: &str) -> DatabaseResult<Option<UserPreferenceRecord>> {
        let row = sqlx::query(
            "SELECT user_id, opt_out, opt_out_media, display_name, avatar_url, updated_at
             FROM user_preferences WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(UserPreferenceRecord {
            user_id: row.try_get("user_id")?,
            opt_out: row.try_get("opt_out")?,
            opt_out_media: row.try_get("opt_out_media")?,
            display_name: row.try_get("display_name")?,
            avatar_url: row.try_get("avatar_url")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Insert or replace the preferences of one user. A record with nothing
    /// set removes the row.
    pub async fn upsert(&self, record: &UserPreferenceRecord) -> DatabaseResult<()> {
        if record.is_default() {
            return self.delete(&record.user_id).await;
        }

        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO user_preferences (user_id, opt_out, opt_out_media, display_name, avatar_url, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                opt_out = excluded.opt_out,
                opt_out_media = excluded.opt_out_media,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                updated_at = excluded.updated_at",
        )
        .bind(&record.user_id)
        .bind(record.opt_out)
        .bind(record.opt_out_media)
        .bind(&record.display_name)
        .bind(&record.avatar_url)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: &str) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM user_preferences WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> DatabaseResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_preferences")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
