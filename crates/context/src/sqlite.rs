//! SQLite archive backend.
//!
//! Two tables:
//! - `message_archive` — the append-only source of truth, one row per
//!   message, ordered by arrival, unique on message id (idempotent
//!   appends).
//! - `context_meta` — one row per session recording the last computed
//!   working-context boundary, so a request does not have to recompute
//!   from scratch every time.

use async_trait::async_trait;
use chrono::Utc;
use palaver_core::error::ContextError;
use palaver_core::message::{ContentPart, Message, Role, SessionKey};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::{ArchiveFilter, ArchiveStore, apply_filter};

/// A durable SQLite archive.
pub struct SqliteArchive {
    pool: SqlitePool,
}

impl SqliteArchive {
    /// Create a new SQLite archive from a file path.
    ///
    /// The database and tables are created automatically. Pass
    /// `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, ContextError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| ContextError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| ContextError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let archive = Self { pool };
        archive.run_migrations().await?;
        info!("SQLite archive initialized at {path}");
        Ok(archive)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, ContextError> {
        let archive = Self { pool };
        archive.run_migrations().await?;
        Ok(archive)
    }

    async fn run_migrations(&self) -> Result<(), ContextError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_archive (
                iid         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key TEXT NOT NULL,
                message_id  TEXT NOT NULL UNIQUE,
                role        TEXT NOT NULL,
                parts       TEXT NOT NULL,
                turn_index  INTEGER NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("message_archive table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_archive_session ON message_archive(session_key, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("session index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS context_meta (
                session_key     TEXT PRIMARY KEY,
                last_turn_index INTEGER NOT NULL DEFAULT 0,
                boundary_turn   INTEGER NOT NULL DEFAULT 0,
                token_estimate  INTEGER NOT NULL DEFAULT 0,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("context_meta table: {e}")))?;

        debug!("SQLite archive migrations complete");
        Ok(())
    }

    /// Record the last computed working-context boundary for a session.
    pub async fn save_boundary(
        &self,
        key: &SessionKey,
        boundary_turn: u64,
        token_estimate: usize,
    ) -> Result<(), ContextError> {
        sqlx::query(
            r#"
            INSERT INTO context_meta (session_key, last_turn_index, boundary_turn, token_estimate, updated_at)
            VALUES (?1, 0, ?2, ?3, ?4)
            ON CONFLICT(session_key) DO UPDATE SET
                boundary_turn = excluded.boundary_turn,
                token_estimate = excluded.token_estimate,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.to_string())
        .bind(boundary_turn as i64)
        .bind(token_estimate as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("save boundary: {e}")))?;
        Ok(())
    }

    /// The last recorded working-context boundary, if any.
    pub async fn load_boundary(
        &self,
        key: &SessionKey,
    ) -> Result<Option<(u64, usize)>, ContextError> {
        let row = sqlx::query(
            "SELECT boundary_turn, token_estimate FROM context_meta WHERE session_key = ?1",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("load boundary: {e}")))?;

        Ok(row.map(|r| {
            let boundary: i64 = r.try_get("boundary_turn").unwrap_or(0);
            let tokens: i64 = r.try_get("token_estimate").unwrap_or(0);
            (boundary as u64, tokens as usize)
        }))
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, ContextError> {
        let id: String = row
            .try_get("message_id")
            .map_err(|e| ContextError::Corrupted(format!("message_id column: {e}")))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| ContextError::Corrupted(format!("role column: {e}")))?;
        let parts_json: String = row
            .try_get("parts")
            .map_err(|e| ContextError::Corrupted(format!("parts column: {e}")))?;
        let turn_index: i64 = row
            .try_get("turn_index")
            .map_err(|e| ContextError::Corrupted(format!("turn_index column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| ContextError::Corrupted(format!("created_at column: {e}")))?;

        let role = match role_str.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "tool" => Role::Tool,
            other => return Err(ContextError::Corrupted(format!("unknown role: {other}"))),
        };

        let parts: Vec<ContentPart> = serde_json::from_str(&parts_json)
            .map_err(|e| ContextError::Corrupted(format!("parts payload: {e}")))?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Message {
            id,
            role,
            parts,
            turn_index: turn_index as u64,
            created_at,
        })
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchive {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, key: &SessionKey, message: Message) -> Result<(), ContextError> {
        let parts_json = serde_json::to_string(&message.parts)
            .map_err(|e| ContextError::Corrupted(format!("serialize parts: {e}")))?;

        // INSERT OR IGNORE keeps appends idempotent on message_id.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_archive
                (session_key, message_id, role, parts, turn_index, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(key.to_string())
        .bind(&message.id)
        .bind(message.role.as_str())
        .bind(parts_json)
        .bind(message.turn_index as i64)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("append: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO context_meta (session_key, last_turn_index, boundary_turn, token_estimate, updated_at)
            VALUES (?1, ?2, 0, 0, ?3)
            ON CONFLICT(session_key) DO UPDATE SET
                last_turn_index = MAX(context_meta.last_turn_index, excluded.last_turn_index),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.to_string())
        .bind(message.turn_index as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("update meta: {e}")))?;

        Ok(())
    }

    async fn load(&self, key: &SessionKey) -> Result<Vec<Message>, ContextError> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, role, parts, turn_index, created_at
            FROM message_archive
            WHERE session_key = ?1
            ORDER BY iid ASC
            "#,
        )
        .bind(key.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("load: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn query(
        &self,
        key: &SessionKey,
        filter: &ArchiveFilter,
    ) -> Result<Vec<Message>, ContextError> {
        // Role is pushed into SQL; text matching happens over decoded
        // parts so it sees only the textual content.
        let rows = match filter.role {
            Some(role) => {
                sqlx::query(
                    r#"
                    SELECT message_id, role, parts, turn_index, created_at
                    FROM message_archive
                    WHERE session_key = ?1 AND role = ?2
                    ORDER BY iid ASC
                    "#,
                )
                .bind(key.to_string())
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT message_id, role, parts, turn_index, created_at
                    FROM message_archive
                    WHERE session_key = ?1
                    ORDER BY iid ASC
                    "#,
                )
                .bind(key.to_string())
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| ContextError::Unavailable(format!("query: {e}")))?;

        let messages = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        let residual = ArchiveFilter {
            role: None,
            contains: filter.contains.clone(),
            limit: filter.limit,
        };
        Ok(apply_filter(&messages, &residual))
    }

    async fn count(&self, key: &SessionKey) -> Result<usize, ContextError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM message_archive WHERE session_key = ?1")
            .bind(key.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ContextError::Unavailable(format!("count: {e}")))?;
        let n: i64 = row.try_get("n").unwrap_or(0);
        Ok(n as usize)
    }

    async fn clear(&self, key: &SessionKey) -> Result<(), ContextError> {
        sqlx::query("DELETE FROM message_archive WHERE session_key = ?1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ContextError::Unavailable(format!("clear: {e}")))?;
        sqlx::query("DELETE FROM context_meta WHERE session_key = ?1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ContextError::Unavailable(format!("clear meta: {e}")))?;
        Ok(())
    }

    async fn record_boundary(
        &self,
        key: &SessionKey,
        boundary_turn: u64,
        token_estimate: usize,
    ) -> Result<(), ContextError> {
        self.save_boundary(key, boundary_turn, token_estimate).await
    }

    async fn last_turn_index(&self, key: &SessionKey) -> Result<u64, ContextError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(turn_index), 0) AS t FROM message_archive WHERE session_key = ?1",
        )
        .bind(key.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ContextError::Unavailable(format!("last_turn_index: {e}")))?;
        let t: i64 = row.try_get("t").unwrap_or(0);
        Ok(t as u64)
    }
}
