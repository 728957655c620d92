//! Per-session dialogue context storage.
//!
//! The dialogue backend is stateless between calls; the context it returns
//! must be handed back unchanged on the next turn of the same Alexa session.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::{Error, Result};

/// Stored contexts untouched for longer than this are discarded.
pub const CONTEXT_TTL_HOURS: i32 = 24;

/// Keyed store of dialogue contexts, one slot per Alexa session.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Context last saved for `session_id`, if any.
    async fn load(&self, session_id: &str) -> Result<Option<Value>>;

    /// Replace the context for `session_id` wholesale.
    async fn save(&self, session_id: &str, context: &Value) -> Result<()>;

    /// Forget `session_id`.
    async fn remove(&self, session_id: &str) -> Result<()>;
}

/// Process-local store. Contexts live as long as the warm container.
#[derive(Default)]
pub struct MemoryContextStore {
    contexts: RwLock<HashMap<String, Value>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently tracked.
    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn load(&self, session_id: &str) -> Result<Option<Value>> {
        Ok(self.contexts.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, context: &Value) -> Result<()> {
        self.contexts
            .write()
            .await
            .insert(session_id.to_string(), context.clone());
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.contexts.write().await.remove(session_id);
        Ok(())
    }
}

/// Postgres-backed store shared by every container of the function.
pub struct PgContextStore {
    pool: PgPool,
}

impl PgContextStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alexa_session_context (
                session_id TEXT PRIMARY KEY,
                context JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let purged = self.purge_expired().await?;
        if purged > 0 {
            info!("Purged {} abandoned session contexts", purged);
        }

        Ok(())
    }

    /// Delete contexts of sessions idle for longer than `CONTEXT_TTL_HOURS`.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM alexa_session_context WHERE updated_at < now() - make_interval(hours => $1)",
        )
        .bind(CONTEXT_TTL_HOURS)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContextStore for PgContextStore {
    async fn load(&self, session_id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT context FROM alexa_session_context WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get::<Value, _>("context"))
            .transpose()
            .map_err(Error::Database)
    }

    async fn save(&self, session_id: &str, context: &Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alexa_session_context (session_id, context, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (session_id)
            DO UPDATE SET context = EXCLUDED.context, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session_id)
        .bind(context)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM alexa_session_context WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
