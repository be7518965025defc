//! Drains the gateway's mirror queue into `PostgreSQL`.
//!
//! Every [`MirrorEvent`] becomes one statement. A failed statement is
//! logged and dropped: the mirror is advisory and the in-memory store stays
//! authoritative, so nothing is retried and nothing flows back.

use sqlx::PgPool;
use tandem_core::mirror::MirrorEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DbError;

/// Writes mirror events to the reporting tables.
#[derive(Debug, Clone)]
pub struct MirrorWriter {
    pool: PgPool,
}

impl MirrorWriter {
    /// Create a writer bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a single event.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the statement fails and
    /// [`DbError::Serialization`] if an item cannot be encoded.
    pub async fn apply(&self, event: &MirrorEvent) -> Result<(), DbError> {
        match event {
            MirrorEvent::SpaceCreated {
                space_id,
                slug,
                created_at,
            } => {
                sqlx::query(
                    r"INSERT INTO spaces (id, slug, created_at)
                      VALUES ($1, $2, $3)
                      ON CONFLICT (slug) DO NOTHING",
                )
                .bind(space_id.into_inner())
                .bind(slug.as_str())
                .bind(*created_at)
                .execute(&self.pool)
                .await?;
            }
            MirrorEvent::ItemCreated { slug, item } => {
                let payload = serde_json::to_value(item.as_ref())?;
                sqlx::query(
                    r"INSERT INTO canvas_items (space_slug, item_id, item_type, payload, created_at)
                      VALUES ($1, $2, $3, $4, $5)
                      ON CONFLICT (space_slug, item_id) DO NOTHING",
                )
                .bind(slug.as_str())
                .bind(item.id.as_str())
                .bind(item.item_type().as_str())
                .bind(payload)
                .bind(item.created_at)
                .execute(&self.pool)
                .await?;
            }
            MirrorEvent::ItemDeleted { slug, item_id } => {
                sqlx::query(
                    r"UPDATE canvas_items SET deleted_at = now()
                      WHERE space_slug = $1 AND item_id = $2 AND deleted_at IS NULL",
                )
                .bind(slug.as_str())
                .bind(item_id.as_str())
                .execute(&self.pool)
                .await?;
            }
            MirrorEvent::SpaceReset { slug } => {
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    r"UPDATE canvas_items SET deleted_at = now()
                      WHERE space_slug = $1 AND deleted_at IS NULL",
                )
                .bind(slug.as_str())
                .execute(&mut *tx)
                .await?;
                sqlx::query(r"UPDATE spaces SET last_reset_at = now() WHERE slug = $1")
                    .bind(slug.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }

    /// Apply events until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<MirrorEvent>) {
        tracing::info!("Mirror writer started");
        while let Some(event) = rx.recv().await {
            match self.apply(&event).await {
                Ok(()) => tracing::debug!(event = event.kind(), "mirrored"),
                Err(error) => {
                    tracing::warn!(event = event.kind(), %error, "mirror write failed, dropping");
                }
            }
        }
        tracing::info!("Mirror writer stopped");
    }

    /// Run the writer on its own task.
    pub fn spawn(self, rx: mpsc::Receiver<MirrorEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }
}
