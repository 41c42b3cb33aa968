use crate::embedder::{LazyEmbedder, TextEmbedder};
use crate::tokenize::candidate_phrases;
use gramfeed_core::{CoreError, EmbeddingError, KeywordConfig, KeywordResult};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A phrase with its embedding, carried through candidate scoring.
struct Candidate {
    phrase: String,
    relevance: f32,
    embedding: Vec<f32>,
}

/// Extract the keywords that best represent `text`, using embeddings from
/// `embedder`.
///
/// Candidates are n-grams of the text itself, scored by cosine similarity
/// against the full text's embedding, filtered by the minimum similarity,
/// then selected greedily with maximal marginal relevance so near-duplicate
/// phrases do not crowd out distinct ones. Results come back sorted by
/// similarity, highest first.
pub fn extract_with(
    embedder: &dyn TextEmbedder,
    text: &str,
    config: &KeywordConfig,
) -> Result<Vec<KeywordResult>, CoreError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let phrases = candidate_phrases(text, config.max_candidates);
    if phrases.is_empty() {
        debug!("no candidate phrases survived tokenization");
        return Ok(Vec::new());
    }

    // One batch: the full text first, then every candidate.
    let mut inputs: Vec<&str> = Vec::with_capacity(phrases.len() + 1);
    inputs.push(text);
    inputs.extend(phrases.iter().map(String::as_str));
    let mut embeddings = embedder.embed_batch(&inputs)?;
    if embeddings.len() != inputs.len() {
        return Err(EmbeddingError::InferenceFailed {
            reason: format!(
                "embedder returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            ),
        }
        .into());
    }
    let text_embedding = embeddings.remove(0);

    // Embeddings are unit length, cosine similarity is the dot product.
    let mut pool: Vec<Candidate> = phrases
        .into_iter()
        .zip(embeddings)
        .map(|(phrase, embedding)| Candidate {
            relevance: dot(&embedding, &text_embedding),
            phrase,
            embedding,
        })
        .filter(|c| c.relevance >= config.min_similarity)
        .collect();

    let mut selected: Vec<Candidate> = Vec::with_capacity(config.top_k);
    while selected.len() < config.top_k && !pool.is_empty() {
        let lambda = config.diversity_lambda;
        let best = pool
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let redundancy = selected
                    .iter()
                    .map(|s| dot(&c.embedding, &s.embedding))
                    .fold(f32::NEG_INFINITY, f32::max);
                let score = if selected.is_empty() {
                    c.relevance
                } else {
                    lambda * c.relevance - (1.0 - lambda) * redundancy
                };
                (i, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        match best {
            Some(i) => selected.push(pool.swap_remove(i)),
            None => break,
        }
    }

    let mut results: Vec<KeywordResult> = selected
        .into_iter()
        .map(|c| KeywordResult {
            keyword: c.phrase,
            similarity: c.relevance,
        })
        .collect();
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(results)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Keyword extraction facade owning the lazily loaded model.
pub struct KeywordEngine {
    embedder: Arc<LazyEmbedder>,
    config: KeywordConfig,
}

impl KeywordEngine {
    pub fn new(config: KeywordConfig) -> Self {
        Self {
            embedder: Arc::new(LazyEmbedder::new(config.model_dir.clone())),
            config,
        }
    }

    pub fn extract(&self, text: &str) -> Result<Vec<KeywordResult>, CoreError> {
        let embedder = self.embedder.get()?;
        extract_with(embedder.as_ref(), text, &self.config)
    }

    /// Like [`extract`](Self::extract) but degrades to an empty list when
    /// the model is unavailable or inference fails. Ingestion keeps running
    /// without keywords rather than failing the whole batch.
    pub fn extract_or_empty(&self, text: &str) -> Vec<KeywordResult> {
        match self.extract(text) {
            Ok(keywords) => keywords,
            Err(e) => {
                warn!("keyword extraction skipped: {e}");
                Vec::new()
            }
        }
    }

    /// Extract keywords for many texts off the async runtime's worker
    /// threads, with inference parallelism capped to the machine's cores
    /// (at most 8, model inference saturates quickly).
    pub async fn extract_many(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<KeywordResult>>, CoreError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8);
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut handles = Vec::with_capacity(texts.len());
        for text in texts {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CoreError::Internal {
                    message: format!("extraction semaphore closed: {e}"),
                })?;
            let embedder = self.embedder.clone();
            let config = self.config.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                // Blank text never needs the model.
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let loaded = embedder.get()?;
                extract_with(loaded.as_ref(), &text, &config)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let keywords = handle.await.map_err(|e| CoreError::Internal {
                message: format!("extraction task panicked: {e}"),
            })??;
            results.push(keywords);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic embedder: maps a few known phrases to fixed unit
    /// vectors so similarity relationships are controlled by the test.
    struct FakeEmbedder;

    fn unit(v: [f32; 3]) -> Vec<f32> {
        let mut v = v.to_vec();
        crate::embedder::l2_normalize(&mut v);
        v
    }

    impl TextEmbedder for FakeEmbedder {
        fn dim(&self) -> usize {
            3
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }

    impl FakeEmbedder {
        fn vector_for(&self, text: &str) -> Vec<f32> {
            // Phrases mentioning "solar" cluster on one axis, "garden" on
            // another; everything else lands far from the full text.
            let solar = text.contains("solar") || text.contains("panel");
            let garden = text.contains("garden");
            if solar && garden {
                unit([0.7, 0.7, 0.0])
            } else if solar {
                unit([1.0, 0.3, 0.0])
            } else if garden {
                unit([0.1, 1.0, 0.0])
            } else {
                unit([0.0, 0.0, 1.0])
            }
        }
    }

    fn config() -> KeywordConfig {
        KeywordConfig::new("/unused")
    }

    #[test]
    fn empty_text_yields_no_keywords() {
        let results = extract_with(&FakeEmbedder, "   ", &config()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn stopword_only_text_yields_no_keywords() {
        let results = extract_with(&FakeEmbedder, "the and of to", &config()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn keywords_come_from_the_text_itself() {
        let text = "installing solar panels beside the garden shed";
        let results = extract_with(&FakeEmbedder, text, &config()).unwrap();
        assert!(!results.is_empty());
        for r in &results {
            for word in r.keyword.split(' ') {
                assert!(text.contains(word), "{word} not from source text");
            }
        }
    }

    #[test]
    fn results_sorted_by_similarity_descending() {
        let text = "installing solar panels beside the garden shed";
        let results = extract_with(&FakeEmbedder, text, &config()).unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn min_similarity_filters_weak_candidates() {
        let mut config = config();
        config.min_similarity = 0.99;
        // Four tokens separate "solar" from "garden", so no 3-gram mixes
        // the clusters and every candidate scores well below the filter.
        let text = "solar panels on the roof beside a lovely garden shed";
        let results = extract_with(&FakeEmbedder, text, &config).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn fewer_candidates_than_top_k_returns_them_all() {
        let results = extract_with(&FakeEmbedder, "solar panels", &config()).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= config().top_k);
    }

    #[test]
    fn diversity_lambda_trades_relevance_for_spread() {
        let text = "installing solar panels beside the garden shed";
        let mut config = config();
        config.top_k = 3;
        config.min_similarity = 0.1;

        // Solar-only phrases score 0.88 against the full text, garden-only
        // phrases 0.77, so pure relevance never reaches the garden cluster.
        fn pure_garden(keyword: &str) -> bool {
            keyword.contains("garden")
                && !keyword.contains("solar")
                && !keyword.contains("panel")
        }

        config.diversity_lambda = 1.0;
        let relevant = extract_with(&FakeEmbedder, text, &config).unwrap();
        assert_eq!(relevant.len(), 3);
        assert!(!relevant.iter().any(|r| pure_garden(&r.keyword)), "{relevant:?}");

        config.diversity_lambda = 0.0;
        let diverse = extract_with(&FakeEmbedder, text, &config).unwrap();
        assert_eq!(diverse.len(), 3);
        assert!(diverse.iter().any(|r| pure_garden(&r.keyword)), "{diverse:?}");
    }

    #[tokio::test]
    async fn extract_many_short_circuits_blank_texts() {
        // No model exists at this path; blank inputs must succeed anyway
        // because they never reach the embedder.
        let engine = KeywordEngine::new(KeywordConfig::new("/nonexistent"));
        let results = engine
            .extract_many(vec!["".to_string(), "  ".to_string()])
            .await
            .unwrap();
        assert_eq!(results, vec![Vec::new(), Vec::new()]);
    }

    #[tokio::test]
    async fn extract_many_surfaces_missing_model() {
        let engine = KeywordEngine::new(KeywordConfig::new("/nonexistent"));
        let results = engine
            .extract_many(vec!["solar panels".to_string()])
            .await;
        assert!(results.is_err());
    }
}
