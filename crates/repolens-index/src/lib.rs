//! Fingerprinted code index, similarity retrieval, and prompt assembly.
//!
//! Pipeline: a source tree is walked ([`scope`]), fingerprinted
//! ([`fingerprint`]), split into fixed-size chunks ([`chunker`]), embedded
//! and persisted ([`indexer`], [`store`]) behind a cache state machine
//! ([`cache`]). Queries are ranked by cosine similarity ([`retriever`]) and
//! packed into a token-budgeted prompt ([`prompt`]).

pub mod cache;
pub mod chunker;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod prompt;
pub mod recent;
pub mod retriever;
pub mod scope;
pub mod store;

pub use error::{IndexError, Result};
