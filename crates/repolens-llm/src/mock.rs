//! Test-only mock embedder.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EmbeddingError;
use crate::provider::EmbeddingProvider;

/// Deterministic embedder: each byte of the input bumps one of `dims`
/// buckets, so texts sharing bytes point in similar directions.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dims: usize,
    /// Inputs containing this substring fail with a `Status` error.
    pub fail_on: Option<String>,
    pub supports_embeddings: bool,
    /// Milliseconds to sleep before returning.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dims: 16,
            fail_on: None,
            supports_embeddings: true,
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            fail_on: Some(needle.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            supports_embeddings: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of `embed` calls made so far, shared across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dims.max(1)];
        let len = v.len();
        for b in text.bytes() {
            v[usize::from(b) % len] += 1.0;
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if !self.supports_embeddings {
            return Err(EmbeddingError::Unsupported {
                provider: "mock".into(),
            });
        }
        if let Some(needle) = &self.fail_on
            && text.contains(needle.as_str())
        {
            return Err(EmbeddingError::Status {
                status: 503,
                body: "mock embedding failure".into(),
            });
        }
        Ok(self.vector_for(text))
    }
}
