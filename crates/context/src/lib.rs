//! Context store implementations for Palaver.
//!
//! The durable archive is the source of truth: append-only, unbounded,
//! ordered by arrival. The working context is a derived, size-bounded
//! projection built per request and discarded after use — trimming never
//! drops anything from the archive.

pub mod in_memory;
pub mod session_lock;
pub mod token;
pub mod working;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use palaver_core::error::ContextError;
use palaver_core::message::{Message, Role, SessionKey};

pub use in_memory::InMemoryArchive;
pub use session_lock::SessionLockManager;
pub use working::{ContextBudget, WorkingContext, build_working_context, load_working_context};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteArchive;

/// Filter for read-only archive queries (history-search style tools).
#[derive(Debug, Clone, Default)]
pub struct ArchiveFilter {
    /// Only messages with this role
    pub role: Option<Role>,

    /// Only messages whose text contains this substring
    /// (case-insensitive)
    pub contains: Option<String>,

    /// Maximum results, newest first (0 = no limit)
    pub limit: usize,
}

/// The durable per-session message archive.
///
/// Implementations: SQLite (durable), in-memory (tests / ephemeral).
/// Any durable key-value or relational store can satisfy this contract.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append a message. Idempotent by `message.id`: re-appending an
    /// already-stored message is a no-op. Never trims.
    async fn append(&self, key: &SessionKey, message: Message) -> Result<(), ContextError>;

    /// Load the full ordered archive for a session, oldest first.
    async fn load(&self, key: &SessionKey) -> Result<Vec<Message>, ContextError>;

    /// Read-only filtered query over the archive, newest first.
    async fn query(
        &self,
        key: &SessionKey,
        filter: &ArchiveFilter,
    ) -> Result<Vec<Message>, ContextError>;

    /// Total messages stored for a session.
    async fn count(&self, key: &SessionKey) -> Result<usize, ContextError>;

    /// Remove all messages for a session.
    async fn clear(&self, key: &SessionKey) -> Result<(), ContextError>;

    /// The highest turn index stored for a session (0 when empty).
    async fn last_turn_index(&self, key: &SessionKey) -> Result<u64, ContextError> {
        let messages = self.load(key).await?;
        Ok(messages.iter().map(|m| m.turn_index).max().unwrap_or(0))
    }

    /// Record the last computed working-context boundary for a session,
    /// so the next request can start from it instead of recomputing
    /// from scratch. Backends without derived state ignore this.
    async fn record_boundary(
        &self,
        _key: &SessionKey,
        _boundary_turn: u64,
        _token_estimate: usize,
    ) -> Result<(), ContextError> {
        Ok(())
    }
}

/// Apply an [`ArchiveFilter`] to an ordered message slice. Shared by
/// backends that filter in process; SQL backends push what they can into
/// the query and reuse this for the rest.
pub(crate) fn apply_filter(messages: &[Message], filter: &ArchiveFilter) -> Vec<Message> {
    let needle = filter.contains.as_deref().map(str::to_lowercase);
    let mut results: Vec<Message> = messages
        .iter()
        .rev()
        .filter(|m| filter.role.is_none_or(|r| m.role == r))
        .filter(|m| {
            needle
                .as_deref()
                .is_none_or(|n| m.joined_text().to_lowercase().contains(n))
        })
        .cloned()
        .collect();
    if filter.limit > 0 {
        results.truncate(filter.limit);
    }
    results
}
