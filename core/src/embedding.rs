//! Embedding function seam and the L2-normalising encoder.

use std::fmt;
use std::sync::Arc;

use crate::preprocess::PreprocessedTensor;
use crate::{Result, RetrievalError, Stage};

/// Norms at or below this are treated as the zero vector.
pub const MIN_EMBEDDING_NORM: f32 = 1e-12;

/// A trained image embedding function.
///
/// Implementations must be safe to call from several request threads at once.
/// Backends that cannot run concurrently serialise access internally (the
/// ONNX implementation holds its session behind a mutex).
///
/// # Example
///
/// ```ignore
/// struct MeanColour;
///
/// impl EmbeddingFunction for MeanColour {
///     fn name(&self) -> &str { "mean-colour" }
///     fn output_dim(&self) -> usize { 3 }
///     fn embed(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>> {
///         // average each channel
///         todo!()
///     }
/// }
/// ```
pub trait EmbeddingFunction: Send + Sync {
    /// Human readable identifier (model file name, registry name, ...).
    fn name(&self) -> &str;

    /// Length of the vectors returned by [`embed`](Self::embed).
    fn output_dim(&self) -> usize;

    /// Run the function on a single-image batch and return the raw embedding.
    fn embed(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>>;
}

/// Unit-norm embedding of one query image.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Normalise a raw vector into an embedding; `None` for the zero vector.
    #[must_use]
    pub fn normalized(raw: &[f32]) -> Option<Self> {
        l2_normalize(raw).map(Self)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    #[must_use]
    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }
}

fn max_abs(v: &[f32]) -> f32 {
    v.iter().fold(0.0_f32, |m, x| m.max(x.abs()))
}

/// Euclidean length, computed on values scaled by `max |v_i|` so large
/// finite inputs do not overflow the sum of squares.
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    let scale = max_abs(v);
    if scale == 0.0 || !scale.is_finite() {
        return scale;
    }
    scale * v.iter().map(|x| (x / scale) * (x / scale)).sum::<f32>().sqrt()
}

/// Scale `v` to unit length. Returns `None` for the zero vector.
#[must_use]
pub fn l2_normalize(v: &[f32]) -> Option<Vec<f32>> {
    let scale = max_abs(v);
    if !scale.is_finite() || scale == 0.0 {
        return None;
    }
    let scaled: Vec<f32> = v.iter().map(|x| x / scale).collect();
    // in [1, sqrt(len)]
    let scaled_norm = scaled.iter().map(|x| x * x).sum::<f32>().sqrt();
    if scale * scaled_norm <= MIN_EMBEDDING_NORM {
        return None;
    }
    Some(scaled.into_iter().map(|x| x / scaled_norm).collect())
}

/// Applies the bundle's embedding function and normalises the result.
#[derive(Clone)]
pub struct Encoder {
    function: Arc<dyn EmbeddingFunction>,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("function", &self.function.name())
            .field("output_dim", &self.function.output_dim())
            .finish()
    }
}

impl Encoder {
    pub fn new(function: Arc<dyn EmbeddingFunction>) -> Self {
        Self { function }
    }

    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.function.output_dim()
    }

    #[must_use]
    pub fn function_name(&self) -> &str {
        self.function.name()
    }

    pub fn encode(&self, tensor: &PreprocessedTensor) -> Result<Embedding> {
        let raw = self.function.embed(tensor)?;

        let expected = self.function.output_dim();
        if raw.len() != expected {
            return Err(RetrievalError::InternalConsistency {
                stage: Stage::Encode,
                expected,
                actual: raw.len(),
            });
        }

        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RetrievalError::Inference {
                reason: "embedding contains non-finite values".into(),
            });
        }

        let Some(normalized) = l2_normalize(&raw) else {
            tracing::warn!(
                model = %self.function.name(),
                dims = raw.len(),
                "embedding function returned a zero-norm vector"
            );
            return Err(RetrievalError::DegenerateEmbedding { dims: raw.len() });
        };

        tracing::debug!(dims = normalized.len(), "encoded query embedding");
        Ok(Embedding(normalized))
    }
}
