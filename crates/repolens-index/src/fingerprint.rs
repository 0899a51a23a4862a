//! Staleness detection over file metadata.
//!
//! The fingerprint hashes `(path, mtime, size)` for every in-scope file. It
//! is best-effort: an edit that keeps both size and mtime goes unnoticed.

use std::fmt;
use std::fmt::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scope::{SourceFile, SourceFilter, walk};

/// Hex-encoded blake3 digest of a tree's file metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Walk `root` and fingerprint every file matching `filter`.
///
/// # Errors
///
/// Returns an error only if `root` is not a directory. Files whose metadata
/// cannot be read are logged and left out.
pub fn compute(root: &Path, filter: &SourceFilter) -> Result<Fingerprint> {
    let files = walk(root, filter)?;
    Ok(compute_files(&files))
}

/// Fingerprint an already-walked file list (must be sorted by `rel_path`).
#[must_use]
pub fn compute_files(files: &[SourceFile]) -> Fingerprint {
    let mut manifest = String::new();
    for file in files {
        let meta = match std::fs::metadata(&file.abs_path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(file = %file.rel_path, "skipping file with unreadable metadata: {e}");
                continue;
            }
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let _ = writeln!(manifest, "{}\0{mtime}\0{}", file.rel_path, meta.len());
    }
    Fingerprint(blake3::hash(manifest.as_bytes()).to_hex().to_string())
}
