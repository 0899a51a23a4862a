use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub recent: RecentConfig,
}

fn default_base_url() -> String {
    "http://localhost:11435".into()
}

fn default_endpoint() -> String {
    "/api/embed".into()
}

fn default_embedding_model() -> String {
    "mxbai-embed-large".into()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Embedding service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".java", ".cpp", ".c", ".ts", ".go", ".rb", ".php",
    ]
    .map(String::from)
    .to_vec()
}

fn default_ignore_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "__pycache__",
        "target",
        "venv",
        ".venv",
        "dist",
        "build",
    ]
    .map(String::from)
    .to_vec()
}

fn default_max_chunk_tokens() -> usize {
    128
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".repolens")
}

/// Source scope and on-disk index location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    /// Chunk size in estimated tokens (4 characters each).
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_dirs: default_ignore_dirs(),
            max_chunk_tokens: default_max_chunk_tokens(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Try to send the whole corpus, falling back to `top_k` when it does
    /// not fit the prompt budget.
    #[serde(default)]
    pub include_all: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            include_all: false,
        }
    }
}

fn default_prompt_max_tokens() -> usize {
    4096
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub custom_instructions: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_prompt_max_tokens(),
            custom_instructions: String::new(),
        }
    }
}

fn default_recent_max_entries() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecentConfig {
    #[serde(default = "default_recent_max_entries")]
    pub max_entries: usize,
}

impl Default for RecentConfig {
    fn default() -> Self {
        Self {
            max_entries: default_recent_max_entries(),
        }
    }
}
