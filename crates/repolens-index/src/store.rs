//! On-disk index files, one per repository.
//!
//! File format: `{"repo_hash": "...", "embeddings": [{"file", "chunk_index",
//! "chunk", "embedding"}]}`. Writes go to a temporary file in the same
//! directory and are renamed into place, so a reader never sees a partial
//! index.

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::fingerprint::Fingerprint;

const INDEX_SUBDIR: &str = "indexes";
const DIGEST_LEN: usize = 12;

/// One embedded slice of a file. Identified by `(file_path, chunk_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(rename = "file")]
    pub file_path: String,
    pub chunk_index: usize,
    #[serde(rename = "chunk")]
    pub text: String,
    #[serde(rename = "embedding", default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// A repository's chunk set, valid for the tree state described by
/// `fingerprint`. Replaced wholesale on rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(rename = "repo_hash")]
    pub fingerprint: Fingerprint,
    #[serde(rename = "embeddings")]
    pub chunks: Vec<ChunkRecord>,
}

impl Index {
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Stable identity of a repository, used to name its index file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    identity: String,
    slug: String,
    digest: String,
}

impl RepoId {
    /// Identity from a local directory (canonicalized).
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be canonicalized.
    pub fn from_path(root: &Path) -> Result<Self> {
        let canonical = std::fs::canonicalize(root)?;
        Ok(Self::from_identity(&canonical.to_string_lossy()))
    }

    /// Identity from an arbitrary string such as a clone URL.
    #[must_use]
    pub fn from_identity(identity: &str) -> Self {
        let digest = blake3::hash(identity.as_bytes()).to_hex()[..DIGEST_LEN].to_string();
        Self {
            identity: identity.to_string(),
            slug: slug(identity),
            digest,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// `<slug>-<digest>`, safe for use as a file name.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}-{}", self.slug, self.digest)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

fn slug(identity: &str) -> String {
    let trimmed = identity.trim_end_matches(['/', '\\']);
    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let last = last.strip_suffix(".git").unwrap_or(last);
    let slug: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() || slug.chars().all(|c| c == '.') {
        "repo".into()
    } else {
        slug
    }
}

/// Directory of persisted indexes.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(INDEX_SUBDIR),
        }
    }

    #[must_use]
    pub fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.dir.join(format!("{}.json", repo.key()))
    }

    /// Load the persisted index, `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self, repo: &RepoId) -> Result<Option<Index>> {
        let path = self.path_for(repo);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let index = serde_json::from_slice(&bytes)?;
        Ok(Some(index))
    }

    /// Atomically replace the persisted index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Persist`] if the write or rename fails; any
    /// previous index file is left untouched.
    pub fn save(&self, repo: &RepoId, index: &Index) -> Result<PathBuf> {
        let path = self.path_for(repo);
        write_json_atomic(&path, index)?;
        tracing::debug!(path = %path.display(), chunks = index.len(), "index persisted");
        Ok(path)
    }
}

/// Serialize `value` to a temporary file next to `path`, fsync, and rename
/// it over `path`. On failure the previous file is untouched.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persist_err = |source| IndexError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(dir).map_err(persist_err)?;
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value)
            .map_err(|e| persist_err(std::io::Error::from(e)))?;
        writer.flush().map_err(persist_err)?;
    }
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}
