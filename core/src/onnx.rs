//! ONNX Runtime backed embedding function.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use crate::embedding::EmbeddingFunction;
use crate::preprocess::{CHANNELS, PreprocessedTensor, TARGET_SIZE};
use crate::{ArtifactKind, Result, RetrievalError};

const INTRA_THREADS: usize = 4;

fn inference(cause: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Inference {
        reason: cause.to_string().into_boxed_str(),
    }
}

fn model_config(reason: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::config(ArtifactKind::EmbeddingModel, reason.to_string())
}

/// Image embedding model exported to ONNX.
///
/// The graph takes one float32 input `[1, 224, 224, 3]` and its first output
/// is the embedding. `ort` sessions need exclusive access to run, so calls are
/// serialised through a mutex.
pub struct OnnxEmbedding {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    output_dim: usize,
    name: String,
    path: PathBuf,
}

impl std::fmt::Debug for OnnxEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedding")
            .field("path", &self.path)
            .field("input", &self.input_name)
            .field("output", &self.output_name)
            .field("output_dim", &self.output_dim)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbedding {
    /// Open the model and discover its output dimension with a probe run.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RetrievalError::io(
                ArtifactKind::EmbeddingModel,
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "model file not found"),
            ));
        }

        tracing::debug!(path = %path.display(), "loading embedding model");

        let session = Session::builder()
            .map_err(model_config)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_config)?
            .with_intra_threads(INTRA_THREADS)
            .map_err(model_config)?
            .commit_from_file(path)
            .map_err(|e| model_config(format!("failed to load model: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| model_config("model declares no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| model_config("model declares no outputs"))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        let mut model = Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            output_dim: 0,
            name,
            path: path.to_path_buf(),
        };

        let size = TARGET_SIZE as usize;
        let probe = model
            .run(Array4::zeros((1, size, size, CHANNELS)))
            .map_err(|e| model_config(format!("probe inference failed: {e}")))?;
        if probe.is_empty() {
            return Err(model_config("model produced an empty embedding"));
        }
        model.output_dim = probe.len();

        tracing::info!(
            model = %model.name,
            output_dim = model.output_dim,
            "embedding model loaded"
        );
        Ok(model)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, pixels: Array4<f32>) -> Result<Vec<f32>> {
        let input = Tensor::from_array(pixels)
            .map_err(|e| inference(format!("failed to create input tensor: {e}")))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(inference)?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| inference(format!("no output '{}' from model", self.output_name)))?;
        let (_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| inference(format!("failed to extract embedding: {e}")))?;

        Ok(data.to_vec())
    }
}

impl EmbeddingFunction for OnnxEmbedding {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn embed(&self, tensor: &PreprocessedTensor) -> Result<Vec<f32>> {
        self.run(tensor.view().to_owned())
    }
}
