//! Fixed-size text chunking.
//!
//! Chunks are consecutive, non-overlapping character slices with no
//! awareness of lines or syntax, so chunk indices are reproducible from the
//! text and `max_chars` alone.

use std::path::Path;

use crate::error::Result;
use crate::scope::{SourceFile, SourceFilter, walk};

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunk size in characters for a budget expressed in tokens.
#[must_use]
pub fn max_chars_for_tokens(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN)
}

/// Split `text` into slices of exactly `max_chars` characters (last may be
/// shorter). Text that already fits is returned whole.
///
/// A `max_chars` of zero is treated as one.
#[must_use]
pub fn chunk_file(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(text[start..idx].to_string());
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(text[start..].to_string());
    chunks
}

/// In-scope files under `root`, in traversal order.
///
/// # Errors
///
/// Returns an error if `root` is not a directory.
pub fn list_files(root: &Path, filter: &SourceFilter) -> Result<Vec<SourceFile>> {
    walk(root, filter)
}

/// Decode bytes as UTF-8, dropping invalid sequences instead of replacing them.
#[must_use]
pub fn decode_lenient(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}
