//! Embedding service client.
//!
//! Chunk text and query text go through the same [`EmbeddingProvider::embed`]
//! call. One attempt per call; the caller decides whether a failure skips a
//! chunk or aborts a query.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::{EmbeddingError, Result};
pub use provider::EmbeddingProvider;
