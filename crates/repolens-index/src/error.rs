//! Error types for repolens-index.

use std::path::PathBuf;

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error on a directory, file, or the persisted index.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding the query failed; nothing can be ranked without it.
    #[error("query embedding failed: {0}")]
    Embedding(#[from] repolens_llm::EmbeddingError),

    /// Writing the index file failed; the previous index is left in place.
    #[error("failed to persist index to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build loop observed its cancellation token.
    #[error("build cancelled")]
    Cancelled,

    /// Another build for the same repository is running.
    #[error("a build for {repo} is already in progress")]
    BuildInProgress { repo: String },

    /// Header and footer alone do not fit in the prompt budget.
    #[error("prompt budget of {max_tokens} tokens cannot hold header and instructions ({required} tokens)")]
    BudgetTooSmall { required: usize, max_tokens: usize },

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Background build task panicked or was aborted.
    #[error("build task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
