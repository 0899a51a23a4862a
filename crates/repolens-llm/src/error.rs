/// Failure of a single embedding call.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed embedding response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty embedding list from {provider}")]
    EmptyEmbedding { provider: String },

    #[error("embedding not supported by {provider}")]
    Unsupported { provider: String },
}

impl EmbeddingError {
    /// `true` for transport-level failures (connect, timeout).
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
