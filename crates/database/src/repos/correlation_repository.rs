//! Durable correlation window.
//!
//! Forward rows live in `correlation_entries`; `correlation_canonical` maps
//! every native id taking part in a fan-out (origin and copies) back to its
//! origin. Both tables are written in one transaction so they never drift.

use crate::entities::{CorrelationRow, OriginRef};
use crate::types::DatabaseResult;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;
use tracing::debug;

#[derive(Clone)]
pub struct CorrelationRepository {
    pool: SqlitePool,
}

impl CorrelationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store the destinations of one fan-out, replacing any earlier entry for
    /// the same origin. Rows for a destination channel already listed are
    /// ignored.
    pub async fn record(
        &self,
        gateway: &str,
        origin: &OriginRef,
        rows: &[CorrelationRow],
    ) -> DatabaseResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::delete_origin(&mut tx, gateway, origin).await?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut seen = HashSet::new();
        let mut position: i64 = 0;
        for row in rows {
            if !seen.insert(row.dest_channel.as_str()) {
                continue;
            }
            sqlx::query(
                "INSERT INTO correlation_entries
                 (gateway, origin_account, origin_id, position, dest_account, dest_id, dest_channel, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(gateway)
            .bind(&origin.account)
            .bind(&origin.id)
            .bind(position)
            .bind(&row.dest_account)
            .bind(&row.dest_id)
            .bind(&row.dest_channel)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            position += 1;

            Self::index(&mut tx, gateway, &row.dest_account, &row.dest_id, origin).await?;
        }
        Self::index(&mut tx, gateway, &origin.account, &origin.id, origin).await?;

        tx.commit().await?;
        debug!(gateway, origin = %origin.id, copies = position, "recorded correlation entry");
        Ok(())
    }

    async fn index(
        tx: &mut Transaction<'_, Sqlite>,
        gateway: &str,
        account: &str,
        native_id: &str,
        origin: &OriginRef,
    ) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO correlation_canonical
             (gateway, account, native_id, origin_account, origin_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(gateway)
        .bind(account)
        .bind(native_id)
        .bind(&origin.account)
        .bind(&origin.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn delete_origin(
        tx: &mut Transaction<'_, Sqlite>,
        gateway: &str,
        origin: &OriginRef,
    ) -> DatabaseResult<u64> {
        let removed = sqlx::query(
            "DELETE FROM correlation_entries WHERE gateway = ? AND origin_account = ? AND origin_id = ?",
        )
        .bind(gateway)
        .bind(&origin.account)
        .bind(&origin.id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM correlation_canonical WHERE gateway = ? AND origin_account = ? AND origin_id = ?",
        )
        .bind(gateway)
        .bind(&origin.account)
        .bind(&origin.id)
        .execute(&mut **tx)
        .await?;

        Ok(removed)
    }

    pub async fn contains(&self, gateway: &str, origin: &OriginRef) -> DatabaseResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM correlation_canonical
             WHERE gateway = ? AND account = ? AND native_id = ? AND origin_account = ? AND origin_id = ?",
        )
        .bind(gateway)
        .bind(&origin.account)
        .bind(&origin.id)
        .bind(&origin.account)
        .bind(&origin.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn destinations(
        &self,
        gateway: &str,
        origin: &OriginRef,
    ) -> DatabaseResult<Vec<CorrelationRow>> {
        let rows = sqlx::query(
            "SELECT dest_account, dest_id, dest_channel FROM correlation_entries
             WHERE gateway = ? AND origin_account = ? AND origin_id = ?
             ORDER BY position",
        )
        .bind(gateway)
        .bind(&origin.account)
        .bind(&origin.id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CorrelationRow {
                    dest_account: row.try_get("dest_account")?,
                    dest_id: row.try_get("dest_id")?,
                    dest_channel: row.try_get("dest_channel")?,
                })
            })
            .collect()
    }

    pub async fn find_destination_id(
        &self,
        gateway: &str,
        origin: &OriginRef,
        dest_account: &str,
        dest_channel: &str,
    ) -> DatabaseResult<Option<String>> {
        let row = sqlx::query(
            "SELECT dest_id FROM correlation_entries
             WHERE gateway = ? AND origin_account = ? AND origin_id = ?
               AND dest_account = ? AND dest_channel = ?",
        )
        .bind(gateway)
        .bind(&origin.account)
        .bind(&origin.id)
        .bind(dest_account)
        .bind(dest_channel)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.try_get::<String, _>("dest_id"))
            .transpose()
            .map_err(Into::into)
    }

    /// The origin a native id belongs to, whether it is the origin itself or
    /// one of its copies.
    pub async fn canonical(
        &self,
        gateway: &str,
        account: &str,
        native_id: &str,
    ) -> DatabaseResult<Option<OriginRef>> {
        let row = sqlx::query(
            "SELECT origin_account, origin_id FROM correlation_canonical
             WHERE gateway = ? AND account = ? AND native_id = ?",
        )
        .bind(gateway)
        .bind(account)
        .bind(native_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(OriginRef {
                account: row.try_get("origin_account")?,
                id: row.try_get("origin_id")?,
            })),
            None => Ok(None),
        }
    }

    pub async fn count_origins(&self, gateway: &str) -> DatabaseResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM correlation_canonical
             WHERE gateway = ? AND account = origin_account AND native_id = origin_id",
        )
        .bind(gateway)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Drop the oldest entries of `gateway` until at most `max_origins` remain.
    /// Returns the number of entries removed.
    pub async fn trim(&self, gateway: &str, max_origins: u64) -> DatabaseResult<u64> {
        let total = self.count_origins(gateway).await?;
        if total <= max_origins {
            return Ok(0);
        }
        let excess = i64::try_from(total - max_origins).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            "SELECT origin_account, origin_id FROM correlation_canonical
             WHERE gateway = ? AND account = origin_account AND native_id = origin_id
             ORDER BY rowid
             LIMIT ?",
        )
        .bind(gateway)
        .bind(excess)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for row in rows {
            let origin = OriginRef {
                account: row.try_get("origin_account")?,
                id: row.try_get("origin_id")?,
            };
            Self::delete_origin(&mut tx, gateway, &origin).await?;
            removed += 1;
        }
        tx.commit().await?;

        debug!(gateway, removed, "trimmed correlation entries");
        Ok(removed)
    }

    /// Gateways that have at least one stored entry.
    pub async fn gateways(&self) -> DatabaseResult<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT gateway FROM correlation_canonical ORDER BY gateway")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }
}
