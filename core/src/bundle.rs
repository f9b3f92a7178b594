//! Artifact bundle: the four co-trained artifacts loaded and cross-checked as one unit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::embedding::{EmbeddingFunction, Encoder};
use crate::identifiers::IdentifierTable;
use crate::index::VectorIndex;
use crate::manifest::BundleManifest;
use crate::projection::Projection;
use crate::{ArtifactKind, Result, RetrievalError};

pub const EMBEDDING_MODEL_FILE: &str = "embedding_model.onnx";
pub const PROJECTION_FILE: &str = "projection.bin";
pub const INDEX_FILE: &str = "index.bin";
pub const IDENTIFIERS_FILE: &str = "identifiers.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Hex characters kept from the content fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Immutable, validated set of artifacts produced by one training run.
///
/// Construction either fully succeeds (every cross-artifact check passes) or
/// returns a configuration error; a partially valid bundle never exists.
#[derive(Debug)]
pub struct ArtifactBundle {
    version: String,
    encoder: Encoder,
    projection: Projection,
    index: VectorIndex,
    identifiers: IdentifierTable,
}

impl ArtifactBundle {
    /// Assemble a bundle from in-memory artifacts.
    ///
    /// `version` defaults to a fingerprint of the encoded artifacts.
    pub fn from_parts(
        embedding: Arc<dyn EmbeddingFunction>,
        projection: Projection,
        index: VectorIndex,
        identifiers: IdentifierTable,
        version: Option<String>,
    ) -> Result<Self> {
        let encoder = Encoder::new(embedding);
        check_compatibility(&encoder, &projection, &index, &identifiers)?;

        let version = match version {
            Some(version) => version,
            None => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(encoder.function_name().as_bytes());
                hasher.update(&projection.encode()?);
                hasher.update(&index.encode()?);
                hasher.update(&identifiers.to_json()?);
                fingerprint(&hasher)
            }
        };

        let bundle = Self {
            version,
            encoder,
            projection,
            index,
            identifiers,
        };
        bundle.log_loaded(None);
        Ok(bundle)
    }

    /// Load every artifact from `dir`, opening the ONNX embedding model.
    #[cfg(feature = "onnx")]
    pub fn load(dir: &Path) -> Result<Self> {
        let model_path = dir.join(EMBEDDING_MODEL_FILE);
        let embedding = crate::onnx::OnnxEmbedding::load(&model_path)?;
        Self::load_with(dir, Arc::new(embedding))
    }

    /// Load every artifact from `dir`, opening the ONNX embedding model.
    #[cfg(not(feature = "onnx"))]
    pub fn load(_dir: &Path) -> Result<Self> {
        Err(RetrievalError::config(
            ArtifactKind::EmbeddingModel,
            "recipelens-core was built without the `onnx` feature; use load_with to supply an embedding function",
        ))
    }

    /// Load the projection, index, identifier table and optional manifest from
    /// `dir`, pairing them with an already constructed embedding function.
    pub fn load_with(dir: &Path, embedding: Arc<dyn EmbeddingFunction>) -> Result<Self> {
        let projection_path = required(dir, PROJECTION_FILE, ArtifactKind::Projection)?;
        let index_path = required(dir, INDEX_FILE, ArtifactKind::Index)?;
        let identifiers_path = required(dir, IDENTIFIERS_FILE, ArtifactKind::Identifiers)?;

        let projection_bytes = read_artifact(&projection_path, ArtifactKind::Projection)?;
        let index_bytes = read_artifact(&index_path, ArtifactKind::Index)?;
        let identifiers_bytes = read_artifact(&identifiers_path, ArtifactKind::Identifiers)?;

        let projection = Projection::decode(&projection_bytes)?;
        let index = VectorIndex::decode(&index_bytes)?;
        let identifiers = IdentifierTable::from_json(&identifiers_bytes)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.is_file() {
            let manifest =
                BundleManifest::from_json(&read_artifact(&manifest_path, ArtifactKind::Manifest)?)?;
            manifest.verify_loaded(
                dir,
                &[
                    (PROJECTION_FILE, projection_bytes.as_slice()),
                    (INDEX_FILE, index_bytes.as_slice()),
                    (IDENTIFIERS_FILE, identifiers_bytes.as_slice()),
                ],
            )?;
            manifest.check_shape(embedding.output_dim(), projection.output_dim(), index.len())?;
            Some(manifest)
        } else {
            None
        };

        let encoder = Encoder::new(embedding);
        check_compatibility(&encoder, &projection, &index, &identifiers)?;

        let version = match &manifest {
            Some(manifest) => manifest.version.clone(),
            None => {
                let mut hasher = blake3::Hasher::new();
                let model_path = dir.join(EMBEDDING_MODEL_FILE);
                if model_path.is_file() {
                    hasher.update(&read_artifact(&model_path, ArtifactKind::EmbeddingModel)?);
                } else {
                    hasher.update(encoder.function_name().as_bytes());
                }
                hasher.update(&projection_bytes);
                hasher.update(&index_bytes);
                hasher.update(&identifiers_bytes);
                fingerprint(&hasher)
            }
        };

        let bundle = Self {
            version,
            encoder,
            projection,
            index,
            identifiers,
        };
        bundle.log_loaded(Some(dir));
        Ok(bundle)
    }

    fn log_loaded(&self, dir: Option<&Path>) {
        tracing::info!(
            dir = ?dir,
            version = %self.version,
            model = %self.encoder.function_name(),
            embedding_dim = self.embedding_dim(),
            reduced_dim = self.reduced_dim(),
            catalog_size = self.len(),
            index = self.index.kind(),
            "artifact bundle loaded"
        );
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[must_use]
    pub fn identifiers(&self) -> &IdentifierTable {
        &self.identifiers
    }

    /// `D_embed`
    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        self.encoder.output_dim()
    }

    /// `D_reduced`
    #[must_use]
    pub fn reduced_dim(&self) -> usize {
        self.projection.output_dim()
    }

    /// Catalog size `N`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn required(dir: &Path, file: &str, artifact: ArtifactKind) -> Result<PathBuf> {
    let path = dir.join(file);
    if !path.is_file() {
        return Err(RetrievalError::config(
            artifact,
            format!("missing {}", path.display()),
        ));
    }
    Ok(path)
}

fn read_artifact(path: &Path, artifact: ArtifactKind) -> Result<Vec<u8>> {
    fs_err::read(path).map_err(|err| RetrievalError::io(artifact, path, err))
}

fn fingerprint(hasher: &blake3::Hasher) -> String {
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..FINGERPRINT_LEN].to_string()
}

fn check_compatibility(
    encoder: &Encoder,
    projection: &Projection,
    index: &VectorIndex,
    identifiers: &IdentifierTable,
) -> Result<()> {
    if encoder.output_dim() != projection.input_dim() {
        return Err(RetrievalError::config(
            ArtifactKind::Projection,
            format!(
                "expects {}-dim embeddings but the embedding function produces {}",
                projection.input_dim(),
                encoder.output_dim()
            ),
        ));
    }
    if projection.output_dim() != index.dimension() {
        return Err(RetrievalError::config(
            ArtifactKind::Index,
            format!(
                "stores {}-dim vectors but the projection produces {}",
                index.dimension(),
                projection.output_dim()
            ),
        ));
    }
    if identifiers.len() != index.len() {
        return Err(RetrievalError::config(
            ArtifactKind::Identifiers,
            format!(
                "has {} entries but the index holds {} vectors",
                identifiers.len(),
                index.len()
            ),
        ));
    }
    Ok(())
}
