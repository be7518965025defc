//! Loads the moderation block list and keeps the in-memory copy fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tandem_core::blocklist::BlockList;
use tandem_types::SpaceSlug;
use tokio::task::JoinHandle;

use crate::error::DbError;

/// Operations on the `blocked_spaces` table.
pub struct BlockedSpaceStore<'a> {
    pool: &'a PgPool,
}

/// A row from the `blocked_spaces` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockedSpaceRow {
    /// Slug of the blocked space.
    pub slug: String,
    /// Reason shown to clients.
    pub reason: Option<String>,
    /// When the block was added.
    pub blocked_at: chrono::DateTime<chrono::Utc>,
}

impl<'a> BlockedSpaceStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Every blocked slug with its reason.
    ///
    /// Rows whose slug is not a valid [`SpaceSlug`] can never match a live
    /// space; they are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn load_all(&self) -> Result<HashMap<SpaceSlug, Option<String>>, DbError> {
        let rows = sqlx::query_as::<_, BlockedSpaceRow>(
            r"SELECT slug, reason, blocked_at FROM blocked_spaces ORDER BY slug",
        )
        .fetch_all(self.pool)
        .await?;

        let mut blocked = HashMap::with_capacity(rows.len());
        for row in rows {
            match row.slug.parse::<SpaceSlug>() {
                Ok(slug) => {
                    blocked.insert(slug, row.reason);
                }
                Err(error) => {
                    tracing::warn!(slug = %row.slug, %error, "skipping malformed blocked slug");
                }
            }
        }
        Ok(blocked)
    }

    /// Block a space, replacing any previous reason.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn block(&self, slug: &SpaceSlug, reason: Option<&str>) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO blocked_spaces (slug, reason) VALUES ($1, $2)
              ON CONFLICT (slug) DO UPDATE SET reason = EXCLUDED.reason, blocked_at = now()",
        )
        .bind(slug.as_str())
        .bind(reason)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove a block. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails.
    pub async fn unblock(&self, slug: &SpaceSlug) -> Result<bool, DbError> {
        let result = sqlx::query(r"DELETE FROM blocked_spaces WHERE slug = $1")
            .bind(slug.as_str())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Reload `list` from the database every `period`.
///
/// The first load happens immediately. A failed load keeps the previous
/// snapshot and is retried on the next tick.
pub fn spawn_block_list_refresh(
    pool: PgPool,
    list: Arc<BlockList>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match BlockedSpaceStore::new(&pool).load_all().await {
                Ok(entries) => {
                    let count = entries.len();
                    list.replace(entries);
                    tracing::debug!(count, "block list refreshed");
                }
                Err(error) => {
                    tracing::warn!(%error, "block list refresh failed, keeping previous list");
                }
            }
        }
    })
}
