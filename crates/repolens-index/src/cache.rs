//! Cache state machine over persisted indexes.
//!
//! [`IndexCache::inspect`] classifies a repository as fresh, stale, or
//! missing. A stale cache is never resolved here: callers pass a decision
//! to [`IndexCache::load_or_build`]. At most one build per repository runs
//! at a time; a second request fails with [`IndexError::BuildInProgress`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use repolens_llm::EmbeddingProvider;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::indexer::{BuildProgress, IndexReport, Indexer};
use crate::scope::SourceFilter;
use crate::store::{Index, IndexStore, RepoId};

/// What is on disk relative to the current tree.
#[derive(Debug)]
pub enum CacheStatus {
    /// Persisted fingerprint equals the current one.
    Fresh(Index),
    /// Persisted index exists but the tree changed since.
    Stale(StaleIndex),
    /// Nothing usable on disk.
    Missing { current: Fingerprint },
}

#[derive(Debug)]
pub struct StaleIndex {
    pub cached: Index,
    pub current: Fingerprint,
}

/// Caller's resolution of a stale cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleDecision {
    Rebuild,
    UseStale,
}

/// How a [`LoadedIndex`] was obtained.
#[derive(Debug)]
pub enum IndexSource {
    Fresh,
    Stale,
    Built(IndexReport),
}

/// An index ready for retrieval.
#[derive(Debug)]
pub struct LoadedIndex {
    pub repo: RepoId,
    pub index: Index,
    pub source: IndexSource,
}

/// Tracks repositories with a build in flight.
#[derive(Debug, Clone, Default)]
pub struct BuildRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl BuildRegistry {
    /// Claim `repo` for building until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::BuildInProgress`] if `repo` is already claimed.
    pub fn acquire(&self, repo: &RepoId) -> Result<BuildGuard> {
        let key = repo.key();
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return Err(IndexError::BuildInProgress {
                repo: repo.to_string(),
            });
        }
        Ok(BuildGuard {
            registry: self.clone(),
            key,
        })
    }

    #[must_use]
    pub fn is_building(&self, repo: &RepoId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&repo.key())
    }
}

/// Releases the repository claim on drop.
#[derive(Debug)]
pub struct BuildGuard {
    registry: BuildRegistry,
    key: String,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// A build running on a background task.
pub struct BuildHandle {
    pub progress: watch::Receiver<BuildProgress>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<LoadedIndex>>,
}

impl BuildHandle {
    /// Ask the build to stop before its next file.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the build to finish.
    ///
    /// # Errors
    ///
    /// Returns the build error, or [`IndexError::Join`] if the task panicked.
    pub async fn wait(self) -> Result<LoadedIndex> {
        self.handle.await?
    }
}

/// Owns the persisted indexes and the build loop for them.
pub struct IndexCache<P> {
    store: IndexStore,
    indexer: Indexer<P>,
    builds: BuildRegistry,
}

impl<P: EmbeddingProvider + 'static> IndexCache<P> {
    #[must_use]
    pub fn new(store: IndexStore, indexer: Indexer<P>) -> Self {
        Self {
            store,
            indexer,
            builds: BuildRegistry::default(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    #[must_use]
    pub fn builds(&self) -> &BuildRegistry {
        &self.builds
    }

    /// Compare the persisted index for `root` with the current tree.
    ///
    /// A corrupt index file is logged and reported as missing.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not a directory or the index file
    /// cannot be read.
    pub async fn inspect(&self, root: &Path) -> Result<(RepoId, CacheStatus)> {
        let store = self.store.clone();
        let filter = self.indexer.config().filter.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || inspect_tree(&store, &filter, &root)).await?
    }

    /// Return a usable index for `root`, building if needed.
    ///
    /// Fresh caches are returned without embedding calls, missing caches are
    /// built, and stale caches are resolved by `decide`.
    ///
    /// # Errors
    ///
    /// Returns an error if inspection fails, the build is cancelled, another
    /// build for the repository is running, or the index cannot be persisted.
    pub async fn load_or_build<F>(
        &self,
        root: &Path,
        decide: F,
        progress: Option<&watch::Sender<BuildProgress>>,
        cancel: &CancellationToken,
    ) -> Result<LoadedIndex>
    where
        F: FnOnce(&StaleIndex) -> StaleDecision,
    {
        let (repo, status) = self.inspect(root).await?;
        match status {
            CacheStatus::Fresh(index) => {
                tracing::info!(repo = %repo, chunks = index.len(), "index cache is fresh");
                Ok(LoadedIndex {
                    repo,
                    index,
                    source: IndexSource::Fresh,
                })
            }
            CacheStatus::Stale(stale) => match decide(&stale) {
                StaleDecision::UseStale => {
                    tracing::warn!(repo = %repo, "using stale index");
                    Ok(LoadedIndex {
                        repo,
                        index: stale.cached,
                        source: IndexSource::Stale,
                    })
                }
                StaleDecision::Rebuild => {
                    tracing::info!(repo = %repo, "index cache is stale, rebuilding");
                    let guard = self.builds.acquire(&repo)?;
                    self.build_guarded(guard, repo, root, progress, cancel)
                        .await
                }
            },
            CacheStatus::Missing { .. } => {
                tracing::info!(repo = %repo, "no index cache, building");
                let guard = self.builds.acquire(&repo)?;
                self.build_guarded(guard, repo, root, progress, cancel)
                    .await
            }
        }
    }

    /// Build and persist unconditionally.
    ///
    /// # Errors
    ///
    /// See [`IndexCache::load_or_build`].
    pub async fn rebuild(
        &self,
        root: &Path,
        progress: Option<&watch::Sender<BuildProgress>>,
        cancel: &CancellationToken,
    ) -> Result<LoadedIndex> {
        let repo = RepoId::from_path(root)?;
        let guard = self.builds.acquire(&repo)?;
        self.build_guarded(guard, repo, root, progress, cancel)
            .await
    }

    /// Run [`IndexCache::rebuild`] on a background task.
    ///
    /// The repository is claimed before this returns, so a concurrent
    /// request for the same repository fails immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be resolved or a build for it is
    /// already running.
    pub fn spawn_build(self: &Arc<Self>, root: PathBuf) -> Result<BuildHandle> {
        let repo = RepoId::from_path(&root)?;
        let guard = self.builds.acquire(&repo)?;
        let (tx, rx) = watch::channel(BuildProgress::default());
        let cancel = CancellationToken::new();

        let this = Arc::clone(self);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            this.build_guarded(guard, repo, &root, Some(&tx), &task_cancel)
                .await
        });

        Ok(BuildHandle {
            progress: rx,
            cancel,
            handle,
        })
    }

    async fn build_guarded(
        &self,
        _guard: BuildGuard,
        repo: RepoId,
        root: &Path,
        progress: Option<&watch::Sender<BuildProgress>>,
        cancel: &CancellationToken,
    ) -> Result<LoadedIndex> {
        let outcome = self.indexer.build(root, progress, cancel).await?;
        let store = self.store.clone();
        let (repo, index) = tokio::task::spawn_blocking(move || {
            store.save(&repo, &outcome.index)?;
            Ok::<_, IndexError>((repo, outcome.index))
        })
        .await??;
        Ok(LoadedIndex {
            repo,
            index,
            source: IndexSource::Built(outcome.report),
        })
    }
}

fn inspect_tree(
    store: &IndexStore,
    filter: &SourceFilter,
    root: &Path,
) -> Result<(RepoId, CacheStatus)> {
    let repo = RepoId::from_path(root)?;
    let current = fingerprint::compute(root, filter)?;

    let cached = match store.load(&repo) {
        Ok(cached) => cached,
        Err(IndexError::Json(e)) => {
            tracing::warn!(repo = %repo, "ignoring corrupt index file: {e}");
            None
        }
        Err(e) => return Err(e),
    };

    let status = match cached {
        Some(index) if index.fingerprint == current => CacheStatus::Fresh(index),
        Some(index) => CacheStatus::Stale(StaleIndex {
            cached: index,
            current,
        }),
        None => CacheStatus::Missing { current },
    };
    Ok((repo, status))
}
