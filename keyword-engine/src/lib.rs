//! Semantic keyword extraction for post captions.
//!
//! Candidate phrases are n-grams drawn from the caption itself, scored by
//! embedding similarity against the full caption and selected with maximal
//! marginal relevance. The ONNX model loads lazily on first use.

pub mod embedder;
pub mod extract;
pub mod tokenize;

pub use embedder::{LazyEmbedder, OnnxEmbedder, TextEmbedder};
pub use extract::{extract_with, KeywordEngine};
pub use tokenize::{candidate_phrases, tokenize};
