//! Owned per-process state: one embedding provider, one index cache with
//! its build guards, and the recent-repository list.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use repolens_index::Result;
use repolens_index::cache::{
    BuildHandle, CacheStatus, IndexCache, LoadedIndex, StaleDecision, StaleIndex,
};
use repolens_index::indexer::{BuildProgress, Indexer};
use repolens_index::prompt::{PromptBudget, assemble_with, estimate_tokens};
use repolens_index::recent::RecentRepos;
use repolens_index::retriever::{BudgetWarning, Retriever, ScoredChunk, Selection};
use repolens_index::store::{IndexStore, RepoId};
use repolens_llm::EmbeddingProvider;
use repolens_llm::ollama::OllamaEmbedder;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetrievalConfig};

/// Per-query retrieval settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub include_all: bool,
}

impl From<&RetrievalConfig> for QueryOptions {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            top_k: cfg.top_k,
            include_all: cfg.include_all,
        }
    }
}

impl QueryOptions {
    fn selection(self) -> Selection {
        if self.include_all {
            Selection::WholeCorpus {
                fallback_k: self.top_k,
            }
        } else {
            Selection::TopK(self.top_k)
        }
    }
}

/// A chunk that made it into the working set.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedChunk {
    pub file_path: String,
    pub chunk_index: usize,
    pub similarity: f32,
}

impl From<&ScoredChunk<'_>> for SelectedChunk {
    fn from(scored: &ScoredChunk<'_>) -> Self {
        Self {
            file_path: scored.chunk.file_path.clone(),
            chunk_index: scored.chunk.chunk_index,
            similarity: scored.similarity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub prompt: String,
    /// Working set in rank order. The tail may have been truncated or
    /// dropped by the prompt budget.
    pub selected: Vec<SelectedChunk>,
    /// Set when whole-corpus mode fell back to top-k.
    pub warning: Option<BudgetWarning>,
    pub prompt_tokens: usize,
}

/// Ties one embedding provider to the index cache and recent list.
pub struct Engine<P> {
    config: Config,
    provider: Arc<P>,
    cache: Arc<IndexCache<P>>,
    recent: Mutex<RecentRepos>,
}

impl Engine<OllamaEmbedder> {
    /// Engine talking to the configured embedding service.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let provider = OllamaEmbedder::new(
            config.embedding.base_url.clone(),
            config.embedding.model.clone(),
            config.timeout(),
        )
        .with_endpoint(config.embedding.endpoint.clone());
        Self::new(config, Arc::new(provider))
    }
}

impl<P: EmbeddingProvider + 'static> Engine<P> {
    #[must_use]
    pub fn new(config: Config, provider: Arc<P>) -> Self {
        let data_dir = &config.index.data_dir;
        let indexer = Indexer::new(Arc::clone(&provider), config.indexer_config());
        let cache = Arc::new(IndexCache::new(IndexStore::new(data_dir), indexer));
        let recent = RecentRepos::load(data_dir, config.recent.max_entries);
        Self {
            config,
            provider,
            cache,
            recent: Mutex::new(recent),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<IndexCache<P>> {
        &self.cache
    }

    /// Classify the persisted index for `root` without building.
    ///
    /// # Errors
    ///
    /// See [`IndexCache::inspect`].
    pub async fn inspect(&self, root: &Path) -> Result<(RepoId, CacheStatus)> {
        self.cache.inspect(root).await
    }

    /// Return a usable index for `root`, building when missing and asking
    /// `decide` when stale.
    ///
    /// # Errors
    ///
    /// See [`IndexCache::load_or_build`].
    pub async fn open<F>(
        &self,
        root: &Path,
        decide: F,
        progress: Option<&watch::Sender<BuildProgress>>,
        cancel: &CancellationToken,
    ) -> Result<LoadedIndex>
    where
        F: FnOnce(&StaleIndex) -> StaleDecision,
    {
        let loaded = self
            .cache
            .load_or_build(root, decide, progress, cancel)
            .await?;
        self.remember(&loaded.repo);
        Ok(loaded)
    }

    /// Start an unconditional rebuild on a background task.
    ///
    /// # Errors
    ///
    /// See [`IndexCache::spawn_build`].
    pub fn spawn_build(&self, root: PathBuf) -> Result<BuildHandle> {
        self.cache.spawn_build(root)
    }

    /// Wait for a build started with [`Engine::spawn_build`].
    ///
    /// # Errors
    ///
    /// Returns the build error.
    pub async fn finish_build(&self, handle: BuildHandle) -> Result<LoadedIndex> {
        let loaded = handle.wait().await?;
        self.remember(&loaded.repo);
        Ok(loaded)
    }

    /// Embed `question`, select chunks from `loaded`, and assemble a prompt
    /// within the configured token budget.
    ///
    /// # Errors
    ///
    /// Returns [`repolens_index::IndexError::Embedding`] if the question
    /// cannot be embedded, or [`repolens_index::IndexError::BudgetTooSmall`]
    /// if the question and instructions alone exceed the budget.
    pub async fn query(
        &self,
        loaded: &LoadedIndex,
        question: &str,
        options: QueryOptions,
    ) -> Result<QueryOutcome> {
        let budget = PromptBudget::new(
            self.config.prompt.max_tokens,
            question,
            &self.config.prompt.custom_instructions,
        );
        let retriever = Retriever::new(Arc::clone(&self.provider));
        let selected = retriever
            .retrieve(question, &loaded.index, options.selection(), &budget)
            .await?;
        let prompt = assemble_with(&budget, selected.records())?;
        let prompt_tokens = estimate_tokens(&prompt);

        tracing::debug!(
            repo = %loaded.repo,
            selected = selected.chunks.len(),
            prompt_tokens,
            "prompt assembled"
        );
        Ok(QueryOutcome {
            selected: selected.chunks.iter().map(SelectedChunk::from).collect(),
            warning: selected.warning,
            prompt,
            prompt_tokens,
        })
    }

    /// Recently opened repositories, most recent first.
    #[must_use]
    pub fn recent(&self) -> Vec<String> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }

    fn remember(&self, repo: &RepoId) {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = recent.record(repo.identity()) {
            tracing::warn!("failed to update recent repositories: {e}");
        }
    }
}
