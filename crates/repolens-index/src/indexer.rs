//! Build loop: walk → read → chunk → embed.
//!
//! Files are processed in walk order and chunks in ascending index, one
//! embedding call at a time. Per-item failures are counted and logged; the
//! loop only stops early on cancellation, checked between files.

use std::path::Path;
use std::sync::Arc;

use repolens_llm::EmbeddingProvider;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chunker::{chunk_file, decode_lenient, list_files, max_chars_for_tokens};
use crate::error::{IndexError, Result};
use crate::fingerprint::compute_files;
use crate::scope::{SourceFile, SourceFilter};
use crate::store::{ChunkRecord, Index};

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub filter: SourceFilter,
    /// Chunk size in estimated tokens.
    pub max_chunk_tokens: usize,
}

/// Snapshot of build progress, published after every file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildProgress {
    pub files_done: usize,
    pub files_total: usize,
    pub chunks_embedded: usize,
}

/// Summary of a build run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_total: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_embedded: usize,
    pub chunks_failed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// A freshly built (not yet persisted) index with its report.
#[derive(Debug)]
pub struct BuildOutcome {
    pub index: Index,
    pub report: IndexReport,
}

/// Embeds every in-scope chunk of a tree.
pub struct Indexer<P> {
    provider: Arc<P>,
    config: IndexerConfig,
}

impl<P: EmbeddingProvider> Indexer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: IndexerConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Build a complete index for `root`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Cancelled`] if `cancel` fires, or an error if
    /// `root` is not a directory. Unreadable files and failed chunk
    /// embeddings are recorded in the report instead.
    pub async fn build(
        &self,
        root: &Path,
        progress: Option<&watch::Sender<BuildProgress>>,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        let start = std::time::Instant::now();
        let filter = self.config.filter.clone();
        let walk_root = root.to_path_buf();
        let (files, fingerprint) = tokio::task::spawn_blocking(move || {
            let files = list_files(&walk_root, &filter)?;
            let fingerprint = compute_files(&files);
            Ok::<_, IndexError>((files, fingerprint))
        })
        .await??;

        tracing::info!(total = files.len(), root = %root.display(), "indexing started");
        let (chunks, mut report) = self.embed_files(&files, progress, cancel).await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            chunks = report.chunks_embedded,
            failed = report.chunks_failed,
            skipped = report.files_skipped,
            "indexing finished"
        );

        Ok(BuildOutcome {
            index: Index {
                fingerprint,
                chunks,
            },
            report,
        })
    }

    /// Read, chunk, and embed an already-walked file list.
    async fn embed_files(
        &self,
        files: &[SourceFile],
        progress: Option<&watch::Sender<BuildProgress>>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ChunkRecord>, IndexReport)> {
        let max_chars = max_chars_for_tokens(self.config.max_chunk_tokens);
        let total = files.len();
        let mut report = IndexReport {
            files_total: total,
            ..IndexReport::default()
        };
        let mut chunks = Vec::new();
        if let Some(tx) = progress {
            tx.send_replace(BuildProgress {
                files_total: total,
                ..BuildProgress::default()
            });
        }

        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(done = i, total, "indexing cancelled");
                return Err(IndexError::Cancelled);
            }

            let (embedded, failed) = self
                .index_file(file, max_chars, &mut chunks, &mut report)
                .await;
            report.chunks_embedded += embedded;
            report.chunks_failed += failed;
            if embedded > 0 {
                report.files_indexed += 1;
            }
            tracing::info!(
                file = %file.rel_path,
                progress = format_args!("{}/{total}", i + 1),
                embedded,
                failed,
            );

            if let Some(tx) = progress {
                tx.send_modify(|p| {
                    p.files_done = i + 1;
                    p.chunks_embedded = report.chunks_embedded;
                });
            }
        }
        Ok((chunks, report))
    }

    /// Returns `(embedded, failed)` chunk counts for one file.
    async fn index_file(
        &self,
        file: &SourceFile,
        max_chars: usize,
        out: &mut Vec<ChunkRecord>,
        report: &mut IndexReport,
    ) -> (usize, usize) {
        let bytes = match tokio::fs::read(&file.abs_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %file.rel_path, "skipping unreadable file: {e}");
                report.files_skipped += 1;
                report.errors.push(format!("{}: {e}", file.rel_path));
                return (0, 0);
            }
        };

        let text = decode_lenient(&bytes);
        if text.is_empty() {
            tracing::debug!(file = %file.rel_path, "skipping empty file");
            report.files_skipped += 1;
            return (0, 0);
        }

        let mut embedded = 0;
        let mut failed = 0;
        for (chunk_index, chunk) in chunk_file(&text, max_chars).into_iter().enumerate() {
            match self.provider.embed(&chunk).await {
                Ok(vector) => {
                    out.push(ChunkRecord {
                        file_path: file.rel_path.clone(),
                        chunk_index,
                        text: chunk,
                        vector: Some(vector),
                    });
                    embedded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        file = %file.rel_path,
                        chunk_index,
                        network = e.is_network(),
                        "embedding failed: {e}"
                    );
                    report
                        .errors
                        .push(format!("{} chunk {chunk_index}: {e}", file.rel_path));
                    failed += 1;
                }
            }
        }
        (embedded, failed)
    }
}

#[cfg(test)]
mod tests {
    use repolens_llm::mock::MockEmbedder;

    use super::*;

    fn config(max_chunk_tokens: usize) -> IndexerConfig {
        IndexerConfig {
            filter: SourceFilter::new([".py", ".rs"], [".git"]),
            max_chunk_tokens,
        }
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn builds_one_record_per_chunk() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "small.py", "s".repeat(100).as_bytes());
        write(dir.path(), "big.py", "b".repeat(2000).as_bytes());

        let provider = Arc::new(MockEmbedder::default());
        let indexer = Indexer::new(Arc::clone(&provider), config(128));
        let outcome = indexer
            .build(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();

        let index = outcome.index;
        assert_eq!(index.len(), 5);
        assert_eq!(provider.calls(), 5);
        let big: Vec<_> = index
            .chunks
            .iter()
            .filter(|c| c.file_path == "big.py")
            .map(|c| c.chunk_index)
            .collect();
        assert_eq!(big, vec![0, 1, 2, 3]);
        assert!(index.chunks.iter().all(|c| c.vector.is_some()));
        assert_eq!(outcome.report.files_indexed, 2);
        assert_eq!(outcome.report.chunks_embedded, 5);
    }

    #[tokio::test]
    async fn failed_chunk_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"good code");
        write(dir.path(), "b.py", b"BROKEN chunk");
        write(dir.path(), "c.py", b"more good code");

        let provider = Arc::new(MockEmbedder::failing_on("BROKEN"));
        let indexer = Indexer::new(provider, config(128));
        let outcome = indexer
            .build(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();

        let files: Vec<_> = outcome
            .index
            .chunks
            .iter()
            .map(|c| c.file_path.as_str())
            .collect();
        assert_eq!(files, vec!["a.py", "c.py"]);
        assert_eq!(outcome.report.chunks_failed, 1);
        assert_eq!(outcome.report.files_indexed, 2);
        assert_eq!(outcome.report.errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.py", b"");
        write(dir.path(), "binary.py", b"\xff\xfe\xfd");
        write(dir.path(), "ok.py", b"x = 1");

        let provider = Arc::new(MockEmbedder::default());
        let indexer = Indexer::new(Arc::clone(&provider), config(128));
        let outcome = indexer
            .build(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.index.len(), 1);
        assert_eq!(outcome.report.files_skipped, 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn file_removed_after_walk_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "gone.py", b"deleted before reading");
        write(dir.path(), "kept.py", b"x = 1");
        let cfg = config(128);
        let files = list_files(dir.path(), &cfg.filter).unwrap();
        std::fs::remove_file(dir.path().join("gone.py")).unwrap();

        let provider = Arc::new(MockEmbedder::default());
        let indexer = Indexer::new(Arc::clone(&provider), cfg);
        let (chunks, report) = indexer
            .embed_files(&files, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_path, "kept.py");
        assert_eq!(report.files_total, 2);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("gone.py: "));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn lenient_decoding_drops_invalid_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mixed.py", b"abc\xffdef");

        let indexer = Indexer::new(Arc::new(MockEmbedder::default()), config(128));
        let outcome = indexer
            .build(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.index.chunks[0].text, "abcdef");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_embedding() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"x");

        let provider = Arc::new(MockEmbedder::default());
        let indexer = Indexer::new(Arc::clone(&provider), config(128));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = indexer.build(dir.path(), None, &cancel).await.unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn progress_reports_every_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"a");
        write(dir.path(), "b.rs", b"b");
        write(dir.path(), "c.md", b"out of scope");

        let (tx, rx) = watch::channel(BuildProgress::default());
        let indexer = Indexer::new(Arc::new(MockEmbedder::default()), config(128));
        indexer
            .build(dir.path(), Some(&tx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *rx.borrow(),
            BuildProgress {
                files_done: 2,
                files_total: 2,
                chunks_embedded: 2,
            }
        );
    }

    #[tokio::test]
    async fn fingerprint_matches_standalone_compute() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"a");
        let cfg = config(128);
        let indexer = Indexer::new(Arc::new(MockEmbedder::default()), cfg.clone());
        let outcome = indexer
            .build(dir.path(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome.index.fingerprint,
            crate::fingerprint::compute(dir.path(), &cfg.filter).unwrap()
        );
    }
}
