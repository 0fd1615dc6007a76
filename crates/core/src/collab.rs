//! External collaborator contracts: summarization and image captioning.
//!
//! Both are "string in, string out" services implemented outside the
//! core. They must return within a caller-supplied timeout or fail
//! explicitly — the pipeline never blocks on them indefinitely.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from collaborator calls.
#[derive(Debug, Clone, Error)]
pub enum CollabError {
    #[error("collaborator failed: {0}")]
    Failed(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
}

/// Condenses a span of dropped conversation into a short summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> std::result::Result<String, CollabError>;
}

/// Describes an image reference in words, for providers without image
/// support.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image_ref: &str) -> std::result::Result<String, CollabError>;
}

/// Run a summarizer under a deadline.
pub async fn summarize_with_timeout(
    summarizer: &dyn Summarizer,
    text: &str,
    timeout: Duration,
) -> std::result::Result<String, CollabError> {
    match tokio::time::timeout(timeout, summarizer.summarize(text)).await {
        Ok(result) => result,
        Err(_) => Err(CollabError::Timeout(timeout)),
    }
}

/// Run a captioner under a deadline.
pub async fn caption_with_timeout(
    captioner: &dyn Captioner,
    image_ref: &str,
    timeout: Duration,
) -> std::result::Result<String, CollabError> {
    match tokio::time::timeout(timeout, captioner.caption(image_ref)).await {
        Ok(result) => result,
        Err(_) => Err(CollabError::Timeout(timeout)),
    }
}
