//! In-memory archive — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use palaver_core::error::ContextError;
use palaver_core::message::{Message, SessionKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{ArchiveFilter, ArchiveStore, apply_filter};

/// An in-memory archive keyed by session. Message order is arrival order.
pub struct InMemoryArchive {
    sessions: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchive {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, key: &SessionKey, message: Message) -> Result<(), ContextError> {
        let mut sessions = self.sessions.write().await;
        let messages = sessions.entry(key.to_string()).or_default();
        if messages.iter().any(|m| m.id == message.id) {
            return Ok(());
        }
        messages.push(message);
        Ok(())
    }

    async fn load(&self, key: &SessionKey) -> Result<Vec<Message>, ContextError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&key.to_string()).cloned().unwrap_or_default())
    }

    async fn query(
        &self,
        key: &SessionKey,
        filter: &ArchiveFilter,
    ) -> Result<Vec<Message>, ContextError> {
        let sessions = self.sessions.read().await;
        let messages = sessions.get(&key.to_string()).cloned().unwrap_or_default();
        Ok(apply_filter(&messages, filter))
    }

    async fn count(&self, key: &SessionKey) -> Result<usize, ContextError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&key.to_string()).map_or(0, Vec::len))
    }

    async fn clear(&self, key: &SessionKey) -> Result<(), ContextError> {
        self.sessions.write().await.remove(&key.to_string());
        Ok(())
    }
}
