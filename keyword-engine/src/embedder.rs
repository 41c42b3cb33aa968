//! ONNX Runtime embedding pipeline for sentence-transformers models.
//!
//! The model directory must contain `model.onnx` and `tokenizer.json`.
//! Embeddings are mean-pooled over the attention mask and L2-normalized,
//! so cosine similarity reduces to a dot product.

use gramfeed_core::{CoreError, EmbeddingError};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokenizers::Tokenizer;
use tracing::info;

const MAX_SEQUENCE_LENGTH: usize = 256;

/// Anything that can turn texts into unit-length vectors. Production code
/// uses [`OnnxEmbedder`]; tests substitute deterministic fakes.
pub trait TextEmbedder: Send + Sync {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CoreError>;
    fn dim(&self) -> usize;
}

/// Sentence embedder backed by a local ONNX model.
#[derive(Debug)]
pub struct OnnxEmbedder {
    // Session::run takes &mut self; the lock serializes inference so
    // embed_batch can be called through a shared reference.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dim: usize,
}

impl OnnxEmbedder {
    /// Load a model from a directory containing `model.onnx` and
    /// `tokenizer.json`.
    pub fn load(model_dir: &Path) -> Result<Self, CoreError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for required in [&model_path, &tokenizer_path] {
            if !required.exists() {
                return Err(EmbeddingError::ModelUnavailable {
                    path: required.display().to_string(),
                }
                .into());
            }
        }

        let session = Session::builder()
            .and_then(|mut b| b.commit_from_file(&model_path))
            .map_err(|e| EmbeddingError::InferenceFailed {
                reason: format!("session init: {e}"),
            })?;
        let dim = infer_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| EmbeddingError::TokenizationFailed {
                details: format!("load tokenizer: {e}"),
            })?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::TokenizationFailed {
                details: format!("set truncation: {e}"),
            })?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dim,
        })
    }
}

impl TextEmbedder for OnnxEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::TokenizationFailed {
                details: e.to_string(),
            })?;
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        // Flat [batch_size, seq_len] input tensors.
        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let offset = i * seq_len;
            for (j, &id) in encoding.get_ids().iter().enumerate() {
                input_ids[offset + j] = id as i64;
            }
            for (j, &mask) in encoding.get_attention_mask().iter().enumerate() {
                attention_mask[offset + j] = mask as i64;
            }
            for (j, &tid) in encoding.get_type_ids().iter().enumerate() {
                token_type_ids[offset + j] = tid as i64;
            }
        }

        let shape = [batch_size as i64, seq_len as i64];
        let inference = |reason: ort::Error| EmbeddingError::InferenceFailed {
            reason: reason.to_string(),
        };
        let ids_tensor = Tensor::from_array((shape, input_ids.into_boxed_slice()))
            .map_err(inference)?;
        let mask_tensor =
            Tensor::from_array((shape, attention_mask.clone().into_boxed_slice()))
                .map_err(inference)?;
        let type_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(inference)?;

        let mut session = self.session.lock().map_err(|_| {
            EmbeddingError::InferenceFailed {
                reason: "inference lock poisoned".to_string(),
            }
        })?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_tensor,
            ])
            .map_err(inference)?;

        // Token embeddings arrive as [batch_size, seq_len, dim].
        let (output_shape, output_data) =
            outputs[0].try_extract_tensor::<f32>().map_err(inference)?;
        let dims: &[i64] = output_shape;
        if dims.len() != 3 || dims[0] as usize != batch_size {
            return Err(EmbeddingError::InferenceFailed {
                reason: format!("unexpected output shape {dims:?}"),
            }
            .into());
        }
        if dims[2] as usize != self.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim,
                actual: dims[2] as usize,
            }
            .into());
        }
        let actual_seq_len = dims[1] as usize;

        // Mean pooling over unmasked tokens.
        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mut pooled = vec![0.0f32; self.dim];
            let mut token_count = 0.0f32;
            for j in 0..actual_seq_len {
                let mask_val = attention_mask[i * seq_len + j] as f32;
                if mask_val > 0.0 {
                    let offset = (i * actual_seq_len + j) * self.dim;
                    for (d, p) in pooled.iter_mut().enumerate() {
                        *p += output_data[offset + d] * mask_val;
                    }
                    token_count += mask_val;
                }
            }
            if token_count > 0.0 {
                for p in &mut pooled {
                    *p /= token_count;
                }
            }
            l2_normalize(&mut pooled);
            embeddings.push(pooled);
        }
        Ok(embeddings)
    }
}

/// Double-checked lazy cell: concurrent first callers race to the init
/// lock, exactly one runs the fallible initializer, the rest reuse its
/// result. A failed init is not cached; the next caller retries.
struct LazyCell<T> {
    loaded: OnceLock<Arc<T>>,
    init_lock: Mutex<()>,
}

impl<T> LazyCell<T> {
    fn empty() -> Self {
        Self {
            loaded: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    fn get_or_try_init(
        &self,
        init: impl FnOnce() -> Result<T, CoreError>,
    ) -> Result<Arc<T>, CoreError> {
        if let Some(value) = self.loaded.get() {
            return Ok(value.clone());
        }
        let _guard = self.init_lock.lock().map_err(|_| CoreError::Internal {
            message: "lazy init lock poisoned".to_string(),
        })?;
        // A racing caller may have finished initializing while we waited.
        if let Some(value) = self.loaded.get() {
            return Ok(value.clone());
        }
        let value = Arc::new(init()?);
        let _ = self.loaded.set(value.clone());
        Ok(value)
    }
}

/// Defers model loading until the first extraction asks for it, so services
/// that never touch keywords pay nothing.
pub struct LazyEmbedder {
    model_dir: PathBuf,
    cell: LazyCell<OnnxEmbedder>,
}

impl LazyEmbedder {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            cell: LazyCell::empty(),
        }
    }

    pub fn get(&self) -> Result<Arc<OnnxEmbedder>, CoreError> {
        self.cell
            .get_or_try_init(|| OnnxEmbedder::load(&self.model_dir))
    }
}

/// L2-normalize a vector in place.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn infer_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}
