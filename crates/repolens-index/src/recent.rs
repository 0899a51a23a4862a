//! Most-recently-used repository list.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::write_json_atomic;

pub const RECENT_FILE: &str = "recent_repos.json";
/// Upper bound on `max_entries`.
pub const MAX_RECENT: usize = 10;

/// Bounded, most-recent-first list of repository identities.
#[derive(Debug, Clone)]
pub struct RecentRepos {
    path: PathBuf,
    max_entries: usize,
    entries: Vec<String>,
}

impl RecentRepos {
    /// Load the list from `<data_dir>/recent_repos.json`.
    ///
    /// A missing file is an empty list; an unreadable or malformed one is
    /// logged and also treated as empty. `max_entries` is clamped to
    /// `1..=10`.
    #[must_use]
    pub fn load(data_dir: &Path, max_entries: usize) -> Self {
        let path = data_dir.join(RECENT_FILE);
        let max_entries = max_entries.clamp(1, MAX_RECENT);
        let mut entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Vec<String>>(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "ignoring malformed recent list: {e}");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read recent list: {e}");
                Vec::new()
            }
        };
        dedup_keep_first(&mut entries);
        entries.truncate(max_entries);
        Self {
            path,
            max_entries,
            entries,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Move `identity` to the front, inserting it if absent.
    pub fn touch(&mut self, identity: &str) {
        self.entries.retain(|e| e != identity);
        self.entries.insert(0, identity.to_string());
        self.entries.truncate(self.max_entries);
    }

    /// # Errors
    ///
    /// Returns [`crate::IndexError::Persist`] if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }

    /// [`touch`](Self::touch) then [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// See [`RecentRepos::save`].
    pub fn record(&mut self, identity: &str) -> Result<()> {
        self.touch(identity);
        self.save()
    }
}

fn dedup_keep_first(entries: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    entries.retain(|e| seen.insert(e.clone()));
}
