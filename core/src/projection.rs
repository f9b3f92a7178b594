//! Fitted PCA-style projection from embedding space to the index space.
//!
//! The transform is `y = W (x - mean)`, where `W` is `output_dim x input_dim`
//! (one principal axis per row). With whitening enabled each coordinate is
//! additionally divided by `sqrt(explained_variance[i])`.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::codec::{decode_artifact, encode_artifact};
use crate::embedding::Embedding;
use crate::{ArtifactKind, Result, RetrievalError, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectionPayload {
    input_dim: u32,
    output_dim: u32,
    mean: Vec<f32>,
    components: Vec<f32>,
    #[serde(default)]
    explained_variance: Option<Vec<f32>>,
    #[serde(default)]
    whiten: bool,
}

/// Vector in the reduced (index) space.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedVector(Vec<f32>);

impl ReducedVector {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self(values.into())
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
}

/// Deterministic, stateless dimensionality reduction.
#[derive(Debug, Clone)]
pub struct Projection {
    mean: Array1<f32>,
    components: Array2<f32>,
    explained_variance: Option<Vec<f32>>,
    /// Per-output divisor reciprocal, present when whitening.
    scale: Option<Array1<f32>>,
}

impl Projection {
    /// Build a projection from its fitted parameters.
    ///
    /// `components` is row-major `output_dim x input_dim`. Passing
    /// `whiten_variance` enables whitening with those per-component variances.
    pub fn from_parts(
        mean: Vec<f32>,
        components: Vec<f32>,
        output_dim: usize,
        whiten_variance: Option<Vec<f32>>,
    ) -> Result<Self> {
        let input_dim = mean.len();
        let whiten = whiten_variance.is_some();
        Self::validated(ProjectionPayload {
            input_dim: dim_to_u32(input_dim)?,
            output_dim: dim_to_u32(output_dim)?,
            mean,
            components,
            explained_variance: whiten_variance,
            whiten,
        })
    }

    /// Plain linear map with a zero mean (no centring).
    pub fn linear(components: Vec<f32>, input_dim: usize, output_dim: usize) -> Result<Self> {
        Self::from_parts(vec![0.0; input_dim], components, output_dim, None)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload: ProjectionPayload = decode_artifact(bytes, ArtifactKind::Projection)?;
        Self::validated(payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = ProjectionPayload {
            input_dim: dim_to_u32(self.input_dim())?,
            output_dim: dim_to_u32(self.output_dim())?,
            mean: self.mean.to_vec(),
            components: self.components.iter().copied().collect(),
            explained_variance: self.explained_variance.clone(),
            whiten: self.scale.is_some(),
        };
        encode_artifact(&payload, ArtifactKind::Projection)
    }

    fn validated(payload: ProjectionPayload) -> Result<Self> {
        let input_dim = payload.input_dim as usize;
        let output_dim = payload.output_dim as usize;
        let invalid = |reason: String| RetrievalError::config(ArtifactKind::Projection, reason);

        if input_dim == 0 || output_dim == 0 {
            return Err(invalid(format!(
                "dimensions must be > 0 (input {input_dim}, output {output_dim})"
            )));
        }
        if output_dim > input_dim {
            return Err(invalid(format!(
                "output dimension {output_dim} exceeds input dimension {input_dim}"
            )));
        }
        if payload.mean.len() != input_dim {
            return Err(invalid(format!(
                "mean has {} values, expected {input_dim}",
                payload.mean.len()
            )));
        }
        if payload.components.len() != input_dim * output_dim {
            return Err(invalid(format!(
                "components have {} values, expected {output_dim}x{input_dim}",
                payload.components.len()
            )));
        }
        if payload
            .mean
            .iter()
            .chain(payload.components.iter())
            .any(|v| !v.is_finite())
        {
            return Err(invalid("parameters contain non-finite values".to_string()));
        }

        let scale = if payload.whiten {
            let variance = payload
                .explained_variance
                .as_ref()
                .ok_or_else(|| invalid("whitening requested without explained variance".to_string()))?;
            if variance.len() != output_dim {
                return Err(invalid(format!(
                    "explained variance has {} values, expected {output_dim}",
                    variance.len()
                )));
            }
            if variance.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(invalid(
                    "explained variance must be finite and positive when whitening".to_string(),
                ));
            }
            Some(variance.iter().map(|v| 1.0 / v.sqrt()).collect::<Array1<f32>>())
        } else {
            None
        };

        let components = Array2::from_shape_vec((output_dim, input_dim), payload.components)
            .map_err(|err| invalid(err.to_string()))?;

        Ok(Self {
            mean: Array1::from(payload.mean),
            components,
            explained_variance: payload.explained_variance,
            scale,
        })
    }

    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.components.ncols()
    }

    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.components.nrows()
    }

    #[must_use]
    pub fn is_whitened(&self) -> bool {
        self.scale.is_some()
    }

    pub fn reduce(&self, embedding: &Embedding) -> Result<ReducedVector> {
        let x = embedding.as_slice();
        if x.len() != self.input_dim() {
            return Err(RetrievalError::InternalConsistency {
                stage: Stage::Reduce,
                expected: self.input_dim(),
                actual: x.len(),
            });
        }

        let centred = &ArrayView1::from(x) - &self.mean;
        let mut y = self.components.dot(&centred);
        if let Some(scale) = &self.scale {
            y *= scale;
        }

        tracing::debug!(dims = y.len(), "reduced query embedding");
        Ok(ReducedVector(y.to_vec()))
    }
}

fn dim_to_u32(dim: usize) -> Result<u32> {
    u32::try_from(dim).map_err(|_| {
        RetrievalError::config(ArtifactKind::Projection, format!("dimension {dim} is too large"))
    })
}
