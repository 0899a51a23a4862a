//! Token-budgeted prompt assembly.
//!
//! Shape: `header (question) + context block + footer (custom instructions)`.
//! Ranked chunks are appended in order while they fit; the first chunk that
//! does not fit is cut at the character level to fill what is left, and no
//! further chunks are considered.

use std::fmt::Write;

use crate::chunker::CHARS_PER_TOKEN;
use crate::error::{IndexError, Result};
use crate::store::ChunkRecord;

/// Estimate token count using the chars/4 heuristic, never below one.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

/// Hard cap plus the fixed parts of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBudget {
    pub max_tokens: usize,
    pub header: String,
    pub footer: String,
}

impl PromptBudget {
    #[must_use]
    pub fn new(max_tokens: usize, query: &str, custom_instructions: &str) -> Self {
        Self {
            max_tokens,
            header: render_header(query),
            footer: render_footer(custom_instructions),
        }
    }

    /// Tokens taken by header and footer.
    #[must_use]
    pub fn base_tokens(&self) -> usize {
        estimate_tokens(&self.header) + estimate_tokens(&self.footer)
    }

    /// Tokens left for the context block.
    #[must_use]
    pub fn available(&self) -> usize {
        self.max_tokens.saturating_sub(self.base_tokens())
    }

    /// Tokens the prompt would need to hold every chunk in full.
    #[must_use]
    pub fn projected_tokens<'a, I>(&self, chunks: I) -> usize
    where
        I: IntoIterator<Item = &'a ChunkRecord>,
    {
        chunks
            .into_iter()
            .map(|c| estimate_tokens(&render_chunk(c)))
            .fold(self.base_tokens(), usize::saturating_add)
    }
}

#[must_use]
pub fn render_header(query: &str) -> String {
    format!("Question: {query}\n\nRelevant code from the repository:\n\n")
}

#[must_use]
pub fn render_footer(custom_instructions: &str) -> String {
    if custom_instructions.trim().is_empty() {
        String::new()
    } else {
        format!("Instructions:\n{custom_instructions}\n")
    }
}

#[must_use]
pub fn render_chunk(chunk: &ChunkRecord) -> String {
    let mut out = String::with_capacity(chunk.text.len() + chunk.file_path.len() + 24);
    let _ = write!(
        out,
        "File: {} (Chunk {}):\n{}\n\n",
        chunk.file_path, chunk.chunk_index, chunk.text
    );
    out
}

/// Assemble a prompt for `query` from ranked chunks.
///
/// # Errors
///
/// Returns [`IndexError::BudgetTooSmall`] if the header and instructions
/// alone exceed `max_tokens`.
pub fn assemble<'a, I>(
    query: &str,
    ranked: I,
    custom_instructions: &str,
    max_tokens: usize,
) -> Result<String>
where
    I: IntoIterator<Item = &'a ChunkRecord>,
{
    assemble_with(
        &PromptBudget::new(max_tokens, query, custom_instructions),
        ranked,
    )
}

/// Assemble with explicit header and footer.
///
/// The result always satisfies `estimate_tokens(result) <= budget.max_tokens`.
///
/// # Errors
///
/// Returns [`IndexError::BudgetTooSmall`] if header and footer alone do not fit.
pub fn assemble_with<'a, I>(budget: &PromptBudget, ranked: I) -> Result<String>
where
    I: IntoIterator<Item = &'a ChunkRecord>,
{
    let fixed_chars = budget.header.chars().count() + budget.footer.chars().count();
    // floor(n / 4) <= max  <=>  n <= 4 * max + 3
    let cap_chars = budget
        .max_tokens
        .saturating_mul(CHARS_PER_TOKEN)
        .saturating_add(CHARS_PER_TOKEN - 1);
    if budget.max_tokens == 0 || fixed_chars > cap_chars {
        return Err(IndexError::BudgetTooSmall {
            required: (fixed_chars / CHARS_PER_TOKEN).max(1),
            max_tokens: budget.max_tokens,
        });
    }

    let mut available = budget.available();
    let mut context = String::new();
    for chunk in ranked {
        if available == 0 {
            break;
        }
        let rendered = render_chunk(chunk);
        let cost = estimate_tokens(&rendered);
        if cost <= available {
            context.push_str(&rendered);
            available -= cost;
        } else {
            context.push_str(truncate_chars(
                &rendered,
                available.saturating_mul(CHARS_PER_TOKEN),
            ));
            break;
        }
    }

    // Per-piece floor rounding can overshoot the whole by a few characters.
    let room = cap_chars - fixed_chars;
    let context = truncate_chars(&context, room);

    let mut prompt =
        String::with_capacity(budget.header.len() + context.len() + budget.footer.len());
    prompt.push_str(&budget.header);
    prompt.push_str(context);
    prompt.push_str(&budget.footer);
    Ok(prompt)
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn chunk(path: &str, index: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            file_path: path.into(),
            chunk_index: index,
            text: text.into(),
            vector: None,
        }
    }

    #[test]
    fn estimate_tokens_floor_with_minimum() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 2);
        assert_eq!(estimate_tokens("日本語テキスト"), 1);
    }

    #[test]
    fn render_chunk_format() {
        let c = chunk("src/app.py", 2, "x = 1");
        assert_eq!(render_chunk(&c), "File: src/app.py (Chunk 2):\nx = 1\n\n");
    }

    #[test]
    fn footer_omitted_for_blank_instructions() {
        assert_eq!(render_footer("  \n"), "");
        assert_eq!(render_footer("be brief"), "Instructions:\nbe brief\n");
    }

    #[test]
    fn empty_corpus_returns_header_and_footer() {
        let prompt = assemble("why?", std::iter::empty(), "be brief", 1000).unwrap();
        assert_eq!(
            prompt,
            format!("{}{}", render_header("why?"), render_footer("be brief"))
        );
    }

    #[test]
    fn chunks_appended_in_rank_order() {
        let chunks = [chunk("b.py", 0, "second"), chunk("a.py", 0, "first")];
        let prompt = assemble("q", &chunks, "", 1000).unwrap();
        let b = prompt.find("File: b.py").unwrap();
        let a = prompt.find("File: a.py").unwrap();
        assert!(b < a);
    }

    #[test]
    fn overflowing_chunk_is_truncated_and_stops() {
        let budget = PromptBudget::new(60, "q", "");
        let available = budget.available();
        let big = "y".repeat(available * 8);
        let chunks = [chunk("big.py", 0, &big), chunk("next.py", 0, "never")];

        let prompt = assemble_with(&budget, &chunks).unwrap();
        assert!(prompt.contains("File: big.py"));
        assert!(!prompt.contains("next.py"));
        let context = &prompt[budget.header.len()..];
        assert_eq!(context.chars().count(), available * 4);
        assert!(estimate_tokens(&prompt) <= 60);
    }

    #[test]
    fn fitting_chunks_are_kept_whole() {
        let chunks = [chunk("a.py", 0, "alpha"), chunk("a.py", 1, "beta")];
        let prompt = assemble("q", &chunks, "", 1000).unwrap();
        assert!(prompt.contains("File: a.py (Chunk 0):\nalpha\n\n"));
        assert!(prompt.contains("File: a.py (Chunk 1):\nbeta\n\n"));
    }

    #[test]
    fn header_larger_than_budget_is_error() {
        let long_query = "word ".repeat(200);
        let err = assemble(&long_query, std::iter::empty(), "", 10).unwrap_err();
        assert!(matches!(
            err,
            IndexError::BudgetTooSmall { max_tokens: 10, .. }
        ));
    }

    #[test]
    fn zero_budget_is_error() {
        let budget = PromptBudget {
            max_tokens: 0,
            header: String::new(),
            footer: String::new(),
        };
        assert!(assemble_with(&budget, std::iter::empty()).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("hi", 0), "");
    }

    #[test]
    fn projected_tokens_sums_rendered_chunks() {
        let budget = PromptBudget::new(100, "q", "");
        let chunks = [chunk("a.py", 0, &"z".repeat(400))];
        assert_eq!(
            budget.projected_tokens(&chunks),
            budget.base_tokens() + estimate_tokens(&render_chunk(&chunks[0]))
        );
    }

    fn arb_chunk() -> impl Strategy<Value = ChunkRecord> {
        ("[a-z/]{1,12}\\.py", 0usize..8, ".{0,400}").prop_map(|(p, i, t)| chunk(&p, i, &t))
    }

    proptest! {
        #[test]
        fn never_exceeds_budget(
            chunks in prop::collection::vec(arb_chunk(), 0..20),
            query in ".{0,80}",
            instructions in ".{0,80}",
            max_tokens in 1usize..600,
        ) {
            let budget = PromptBudget::new(max_tokens, &query, &instructions);
            match assemble_with(&budget, &chunks) {
                Ok(prompt) => {
                    prop_assert!(estimate_tokens(&prompt) <= max_tokens);
                    prop_assert!(prompt.starts_with(&budget.header));
                    prop_assert!(prompt.ends_with(&budget.footer));
                }
                Err(IndexError::BudgetTooSmall { .. }) => {
                    let fixed = format!("{}{}", budget.header, budget.footer);
                    prop_assert!(estimate_tokens(&fixed) > max_tokens);
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
    }
}
