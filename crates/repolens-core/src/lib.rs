//! Configuration loading and the engine that ties indexing and retrieval
//! together for one process.

pub mod config;
pub mod engine;

pub use config::Config;
pub use engine::{Engine, QueryOptions, QueryOutcome, SelectedChunk};
