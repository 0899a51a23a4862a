mod env;
mod types;


pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use repolens_index::indexer::IndexerConfig;
use repolens_index::recent::MAX_RECENT;
use repolens_index::scope::SourceFilter;

impl Config {
    /// Load configuration from a TOML file with env var overrides, then
    /// validate it.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if the resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would fail later inside a request, and normalize
    /// extensions to start with a dot.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        url::Url::parse(&self.embedding.base_url).with_context(|| {
            format!(
                "embedding.base_url is not a valid URL: {}",
                self.embedding.base_url
            )
        })?;
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }

        self.index.extensions = self
            .index
            .extensions
            .iter()
            .map(|e| e.as_str().trim())
            .filter(|e| !e.is_empty())
            .map(|e| {
                if e.starts_with('.') {
                    e.to_string()
                } else {
                    format!(".{e}")
                }
            })
            .collect();
        if self.index.extensions.is_empty() {
            bail!("index.extensions must list at least one extension");
        }
        if self.index.max_chunk_tokens == 0 {
            bail!("index.max_chunk_tokens must be greater than 0");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than 0");
        }
        if self.prompt.max_tokens == 0 {
            bail!("prompt.max_tokens must be greater than 0");
        }
        if self.recent.max_entries == 0 || self.recent.max_entries > MAX_RECENT {
            bail!("recent.max_entries must be between 1 and {MAX_RECENT}");
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    #[must_use]
    pub fn source_filter(&self) -> SourceFilter {
        SourceFilter::new(&self.index.extensions, &self.index.ignore_dirs)
    }

    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            filter: self.source_filter(),
            max_chunk_tokens: self.index.max_chunk_tokens,
        }
    }
}
