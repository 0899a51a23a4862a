use std::path::PathBuf;

use super::Config;

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("REPOLENS_EMBEDDING_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.embedding.timeout_secs = secs;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_EMBEDDING_TIMEOUT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_INDEX_EXTENSIONS") {
            self.index.extensions = split_list(&v);
        }
        if let Ok(v) = std::env::var("REPOLENS_INDEX_IGNORE_DIRS") {
            self.index.ignore_dirs = split_list(&v);
        }
        if let Ok(v) = std::env::var("REPOLENS_INDEX_MAX_CHUNK_TOKENS") {
            if let Ok(tokens) = v.parse::<usize>() {
                self.index.max_chunk_tokens = tokens;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_INDEX_MAX_CHUNK_TOKENS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_INDEX_DATA_DIR") {
            self.index.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("REPOLENS_RETRIEVAL_TOP_K") {
            if let Ok(k) = v.parse::<usize>() {
                self.retrieval.top_k = k;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_RETRIEVAL_TOP_K value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_RETRIEVAL_INCLUDE_ALL") {
            if let Ok(enabled) = v.parse::<bool>() {
                self.retrieval.include_all = enabled;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_RETRIEVAL_INCLUDE_ALL value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_PROMPT_MAX_TOKENS") {
            if let Ok(tokens) = v.parse::<usize>() {
                self.prompt.max_tokens = tokens;
            } else {
                tracing::warn!("ignoring invalid REPOLENS_PROMPT_MAX_TOKENS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOLENS_PROMPT_INSTRUCTIONS") {
            self.prompt.custom_instructions = v;
        }
    }
}
