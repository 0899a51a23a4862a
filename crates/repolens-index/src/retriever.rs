//! Similarity ranking and working-set selection.

use std::fmt;
use std::sync::Arc;

use repolens_llm::EmbeddingProvider;

use crate::error::Result;
use crate::prompt::PromptBudget;
use crate::store::{ChunkRecord, Index};

/// Cosine similarity in `[-1, 1]`.
///
/// Zero-magnitude vectors, mismatched dimensions, and non-finite results
/// all score 0. A signed zero is returned as `+0.0`.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() {
        // `-0.0 + 0.0 == +0.0`, so zero scores compare equal under `total_cmp`
        sim.clamp(-1.0, 1.0) + 0.0
    } else {
        0.0
    }
}

/// A chunk with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredChunk<'a> {
    pub similarity: f32,
    pub chunk: &'a ChunkRecord,
}

/// Score every chunk against `query` and sort descending.
///
/// The sort is stable, so equal scores keep index order. Chunks without a
/// vector score 0.
#[must_use]
pub fn rank<'a>(query: &[f32], chunks: &'a [ChunkRecord]) -> Vec<ScoredChunk<'a>> {
    let mut scored: Vec<_> = chunks
        .iter()
        .map(|chunk| ScoredChunk {
            similarity: chunk
                .vector
                .as_deref()
                .map_or(0.0, |v| cosine_similarity(query, v)),
            chunk,
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored
}

/// How many ranked chunks go to the prompt assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The `k` most similar chunks.
    TopK(usize),
    /// Every chunk if the whole corpus fits the budget, else the top
    /// `fallback_k` with a [`BudgetWarning`].
    WholeCorpus { fallback_k: usize },
}

/// The whole corpus did not fit, so selection fell back to top-k.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetWarning {
    pub required_tokens: usize,
    pub max_tokens: usize,
    pub fallback_k: usize,
}

impl fmt::Display for BudgetWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entire codebase needs ~{} tokens but the prompt limit is {}; using the top {} chunks instead",
            self.required_tokens, self.max_tokens, self.fallback_k
        )
    }
}

/// Working set handed to the prompt assembler.
#[derive(Debug)]
pub struct Selected<'a> {
    pub chunks: Vec<ScoredChunk<'a>>,
    pub warning: Option<BudgetWarning>,
}

impl<'a> Selected<'a> {
    pub fn records(&self) -> impl Iterator<Item = &'a ChunkRecord> + '_ {
        self.chunks.iter().map(|s| s.chunk)
    }
}

/// Apply `selection` to a ranked list.
#[must_use]
pub fn select<'a>(
    mut ranked: Vec<ScoredChunk<'a>>,
    selection: Selection,
    budget: &PromptBudget,
) -> Selected<'a> {
    match selection {
        Selection::TopK(k) => {
            ranked.truncate(k);
            Selected {
                chunks: ranked,
                warning: None,
            }
        }
        Selection::WholeCorpus { fallback_k } => {
            let required = budget.projected_tokens(ranked.iter().map(|s| s.chunk));
            if required <= budget.max_tokens {
                return Selected {
                    chunks: ranked,
                    warning: None,
                };
            }
            let warning = BudgetWarning {
                required_tokens: required,
                max_tokens: budget.max_tokens,
                fallback_k,
            };
            tracing::warn!("{warning}");
            ranked.truncate(fallback_k);
            Selected {
                chunks: ranked,
                warning: Some(warning),
            }
        }
    }
}

/// Embeds queries and ranks an index against them.
pub struct Retriever<P> {
    provider: Arc<P>,
}

impl<P: EmbeddingProvider> Retriever<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Embed `query` and select chunks from `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::Embedding`] if the query cannot be
    /// embedded; there is no meaningful ranking without it.
    pub async fn retrieve<'a>(
        &self,
        query: &str,
        index: &'a Index,
        selection: Selection,
        budget: &PromptBudget,
    ) -> Result<Selected<'a>> {
        let query_vector = self.provider.embed(query).await?;
        let ranked = rank(&query_vector, &index.chunks);
        Ok(select(ranked, selection, budget))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use repolens_llm::mock::MockEmbedder;

    use super::*;
    use crate::fingerprint::Fingerprint;

    fn record(path: &str, index: usize, vector: Option<Vec<f32>>) -> ChunkRecord {
        ChunkRecord {
            file_path: path.into(),
            chunk_index: index,
            text: format!("text of {path}#{index}"),
            vector,
        }
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn cosine_mismatched_dims_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn rank_sorts_descending() {
        let chunks = vec![
            record("far", 0, Some(vec![0.0, 1.0])),
            record("near", 0, Some(vec![1.0, 0.1])),
            record("mid", 0, Some(vec![1.0, 1.0])),
        ];
        let ranked = rank(&[1.0, 0.0], &chunks);
        let order: Vec<_> = ranked.iter().map(|s| s.chunk.file_path.as_str()).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
    }

    #[test]
    fn rank_ties_keep_original_order() {
        let chunks: Vec<_> = (0..5)
            .map(|i| record("same", i, Some(vec![1.0, 1.0])))
            .collect();
        let ranked = rank(&[2.0, 2.0], &chunks);
        let order: Vec<_> = ranked.iter().map(|s| s.chunk.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rank_zero_scores_tie_regardless_of_sign() {
        let chunks = vec![
            record("first", 0, Some(vec![0.0, -1.0])),
            record("second", 0, None),
        ];
        let ranked = rank(&[-1.0, 0.0], &chunks);
        let order: Vec<_> = ranked.iter().map(|s| s.chunk.file_path.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);
        assert!(ranked[0].similarity.is_sign_positive());
    }

    #[test]
    fn rank_missing_vector_scores_zero() {
        let chunks = vec![record("none", 0, None), record("some", 0, Some(vec![1.0]))];
        let ranked = rank(&[1.0], &chunks);
        assert_eq!(ranked[0].chunk.file_path, "some");
        assert_eq!(ranked[1].similarity, 0.0);
    }

    #[test]
    fn top_k_takes_highest_three_of_ten() {
        let chunks: Vec<_> = (0..10u8)
            .map(|i| record("f", usize::from(i), Some(vec![f32::from(i), 10.0])))
            .collect();
        let ranked = rank(&[1.0, 0.0], &chunks);
        let budget = PromptBudget::new(1000, "q", "");
        let selected = select(ranked, Selection::TopK(3), &budget);
        let idx: Vec<_> = selected.chunks.iter().map(|s| s.chunk.chunk_index).collect();
        assert_eq!(idx, vec![9, 8, 7]);
        assert!(selected.warning.is_none());
        assert!(selected.chunks[0].similarity >= selected.chunks[1].similarity);
    }

    #[test]
    fn whole_corpus_fits_returns_everything() {
        let chunks: Vec<_> = (0..4).map(|i| record("f", i, Some(vec![1.0]))).collect();
        let budget = PromptBudget::new(10_000, "q", "");
        let selected = select(
            rank(&[1.0], &chunks),
            Selection::WholeCorpus { fallback_k: 2 },
            &budget,
        );
        assert_eq!(selected.chunks.len(), 4);
        assert!(selected.warning.is_none());
    }

    #[test]
    fn whole_corpus_overflow_falls_back_with_warning() {
        let chunks: Vec<_> = (0..50).map(|i| record("f", i, Some(vec![1.0]))).collect();
        let budget = PromptBudget::new(40, "q", "");
        let selected = select(
            rank(&[1.0], &chunks),
            Selection::WholeCorpus { fallback_k: 3 },
            &budget,
        );
        assert_eq!(selected.chunks.len(), 3);
        let warning = selected.warning.unwrap();
        assert_eq!(warning.max_tokens, 40);
        assert_eq!(warning.fallback_k, 3);
        assert!(warning.required_tokens > 40);
        assert!(warning.to_string().contains("top 3"));
    }

    #[tokio::test]
    async fn retrieve_embeds_query_once() {
        let provider = Arc::new(MockEmbedder::default());
        let index = Index {
            fingerprint: Fingerprint::from("fp".to_string()),
            chunks: vec![
                record("a", 0, Some(provider.vector_for("apple"))),
                record("b", 0, Some(provider.vector_for("zzzz"))),
            ],
        };
        let retriever = Retriever::new(Arc::clone(&provider));
        let budget = PromptBudget::new(1000, "apple", "");
        let selected = retriever
            .retrieve("apple", &index, Selection::TopK(1), &budget)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(selected.chunks[0].chunk.file_path, "a");
    }

    #[tokio::test]
    async fn retrieve_fails_when_query_embedding_fails() {
        let provider = Arc::new(MockEmbedder::unsupported());
        let index = Index {
            fingerprint: Fingerprint::from("fp".to_string()),
            chunks: vec![],
        };
        let retriever = Retriever::new(provider);
        let budget = PromptBudget::new(1000, "q", "");
        let err = retriever
            .retrieve("q", &index, Selection::TopK(1), &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::IndexError::Embedding(_)));
    }

    proptest! {
        #[test]
        fn self_similarity_is_one(v in prop::collection::vec(-100.0f32..100.0, 1..32)) {
            prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
            prop_assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
        }

        #[test]
        fn rank_output_is_sorted(
            vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 0..30),
            query in prop::collection::vec(-1.0f32..1.0, 3),
        ) {
            let chunks: Vec<_> = vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| record("p", i, Some(v)))
                .collect();
            let ranked = rank(&query, &chunks);
            prop_assert_eq!(ranked.len(), chunks.len());
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].similarity >= pair[1].similarity);
                if pair[0].similarity == pair[1].similarity {
                    prop_assert!(pair[0].chunk.chunk_index < pair[1].chunk.chunk_index);
                }
            }
        }
    }
}
