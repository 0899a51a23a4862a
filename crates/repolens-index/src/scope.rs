//! Which files of a tree are in scope.
//!
//! Fingerprint and chunker both go through [`walk`], so they never disagree
//! on the file set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

/// Extension allow-list plus directory ignore-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    extensions: Vec<String>,
    ignore_dirs: HashSet<String>,
}

impl SourceFilter {
    /// Directory names are matched case-insensitively; extensions are
    /// matched as a case-sensitive file-name suffix.
    #[must_use]
    pub fn new<E, D>(extensions: E, ignore_dirs: D) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            ignore_dirs: ignore_dirs
                .into_iter()
                .map(|d| d.as_ref().to_lowercase())
                .collect(),
        }
    }

    #[must_use]
    pub fn matches_file(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| name.ends_with(ext.as_str()))
    }

    #[must_use]
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_dirs.contains(&name.to_lowercase())
    }
}

/// A file selected by [`walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub rel_path: String,
}

/// Walk `root` once and return in-scope files sorted by relative path.
///
/// Gitignore and hidden-file rules are disabled: only `filter` decides
/// scope. Unreadable entries are logged and skipped.
///
/// # Errors
///
/// Returns [`IndexError::NotADirectory`] if `root` is not a directory.
pub fn walk(root: &Path, filter: &SourceFilter) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        return Err(IndexError::NotADirectory(root.to_path_buf()));
    }

    let dir_filter = filter.clone();
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir
                && entry.depth() > 0
                && dir_filter.is_ignored_dir(&entry.file_name().to_string_lossy()))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if !filter.matches_file(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let rel_path = relative_path(root, entry.path());
        files.push(SourceFile {
            abs_path: entry.into_path(),
            rel_path,
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
