//! Content-based image retrieval over a fixed catalog.
//!
//! A query image is decoded and resized ([`preprocess`]), embedded by the
//! bundle's trained embedding function ([`embedding`]), projected into a
//! lower-dimensional space ([`projection`]) and matched against the catalog's
//! nearest-neighbour index ([`index`]). Matching positions are resolved to
//! catalog identifiers through the identifier table ([`identifiers`]).
//!
//! All artifacts come from one training run and are loaded together as an
//! [`ArtifactBundle`]; [`RetrievalPipeline`] serves requests against it.
//!
//! ```ignore
//! use recipelens_core::{ArtifactBundle, ImageSource, RetrievalPipeline, DEFAULT_TOP_K};
//!
//! let bundle = ArtifactBundle::load("artifacts".as_ref())?;
//! let pipeline = RetrievalPipeline::new(bundle);
//! let ids = pipeline.retrieve(&ImageSource::from_path("pho.jpg"), DEFAULT_TOP_K)?;
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bundle;
mod codec;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod identifiers;
pub mod index;
pub mod manifest;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod preprocess;
pub mod projection;

pub use bundle::{
    ArtifactBundle, EMBEDDING_MODEL_FILE, IDENTIFIERS_FILE, INDEX_FILE, MANIFEST_FILE,
    PROJECTION_FILE,
};
pub use codec::MAX_ARTIFACT_BYTES;
pub use embedding::{Embedding, EmbeddingFunction, Encoder, l2_normalize};
pub use error::{ArtifactKind, ErrorKind, Result, RetrievalError, Stage};
pub use identifiers::IdentifierTable;
pub use index::{Neighbor, VectorIndex, VectorIndexBuilder};
pub use manifest::{BundleManifest, ManifestEntry};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedding;
pub use pipeline::{BundleHandle, DEFAULT_TOP_K, RetrievalHit, RetrievalPipeline};
pub use preprocess::{ImageSource, PreprocessedTensor, Preprocessor};
pub use projection::{Projection, ReducedVector};
