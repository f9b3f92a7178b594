use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// One of the co-trained files that make up an artifact bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    EmbeddingModel,
    Projection,
    Index,
    Identifiers,
    Manifest,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddingModel => "embedding model",
            Self::Projection => "projection",
            Self::Index => "nearest-neighbour index",
            Self::Identifiers => "identifier table",
            Self::Manifest => "bundle manifest",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preprocess,
    Encode,
    Reduce,
    Search,
    Resolve,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Encode => "encode",
            Self::Reduce => "reduce",
            Self::Search => "search",
            Self::Resolve => "resolve",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a [`RetrievalError`], independent of the stage that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Decode,
    InvalidArgument,
    DegenerateEmbedding,
    InternalConsistency,
    Inference,
}

impl ErrorKind {
    /// Whether the failure is scoped to one request (reject it, keep serving).
    #[must_use]
    pub fn is_request_scoped(self) -> bool {
        !matches!(self, Self::Config | Self::InternalConsistency)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Decode => "decode",
            Self::InvalidArgument => "invalid-argument",
            Self::DegenerateEmbedding => "degenerate-embedding",
            Self::InternalConsistency => "internal-consistency",
            Self::Inference => "inference",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error surface for recipelens-core.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Invalid {artifact}: {reason}")]
    Config {
        artifact: ArtifactKind,
        reason: Cow<'static, str>,
    },

    #[error("Failed to read {artifact} at {path}: {source}")]
    ArtifactIo {
        artifact: ArtifactKind,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode query image: {reason}")]
    Decode { reason: Cow<'static, str> },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: Cow<'static, str> },

    #[error("Embedding function returned a zero-norm vector ({dims} dims)")]
    DegenerateEmbedding { dims: usize },

    #[error("Dimension mismatch in {stage} stage (expected {expected}, got {actual})")]
    InternalConsistency {
        stage: Stage,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding inference failed: {reason}")]
    Inference { reason: Box<str> },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<RetrievalError>,
    },
}

impl RetrievalError {
    pub(crate) fn config(artifact: ArtifactKind, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            artifact,
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(artifact: ArtifactKind, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactIo {
            artifact,
            path: path.into(),
            source,
        }
    }

    /// Tag this error with the stage that produced it. Already-tagged errors keep their stage.
    #[must_use]
    pub fn at(self, stage: Stage) -> Self {
        match self {
            tagged @ Self::Stage { .. } => tagged,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Taxonomy class of the originating error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } | Self::ArtifactIo { .. } => ErrorKind::Config,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::DegenerateEmbedding { .. } => ErrorKind::DegenerateEmbedding,
            Self::InternalConsistency { .. } => ErrorKind::InternalConsistency,
            Self::Inference { .. } => ErrorKind::Inference,
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// Stage that failed, if the error came out of the pipeline.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::InternalConsistency { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Artifact at fault for configuration errors.
    #[must_use]
    pub fn artifact(&self) -> Option<ArtifactKind> {
        match self {
            Self::Config { artifact, .. } | Self::ArtifactIo { artifact, .. } => Some(*artifact),
            Self::Stage { source, .. } => source.artifact(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_preserves_kind() {
        let err = RetrievalError::decode("truncated").at(Stage::Preprocess);
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.stage(), Some(Stage::Preprocess));
        assert_eq!(
            err.to_string(),
            "preprocess stage failed: Failed to decode query image: truncated"
        );
    }

    #[test]
    fn stage_is_attached_once() {
        let err = RetrievalError::DegenerateEmbedding { dims: 4 }
            .at(Stage::Encode)
            .at(Stage::Search);
        assert_eq!(err.stage(), Some(Stage::Encode));
    }

    #[test]
    fn request_scoped_kinds() {
        assert!(ErrorKind::Decode.is_request_scoped());
        assert!(ErrorKind::InvalidArgument.is_request_scoped());
        assert!(ErrorKind::DegenerateEmbedding.is_request_scoped());
        assert!(!ErrorKind::Config.is_request_scoped());
        assert!(!ErrorKind::InternalConsistency.is_request_scoped());
    }

    #[test]
    fn artifact_io_is_config() {
        let err = RetrievalError::io(
            ArtifactKind::Index,
            "/tmp/missing/index.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.artifact(), Some(ArtifactKind::Index));
    }
}
