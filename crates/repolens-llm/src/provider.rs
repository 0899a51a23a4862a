use std::future::Future;
use std::sync::Arc;

use crate::error::EmbeddingError;

/// A service that turns text into a vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` into a vector.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] on network failure, non-success status,
    /// malformed response, or an empty embedding list.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;

    fn name(&self) -> &str;
}

impl<P: EmbeddingProvider> EmbeddingProvider for Arc<P> {
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send {
        (**self).embed(text)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
