//! Binary encoding shared by the projection and index artifacts.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{ArtifactKind, Result, RetrievalError};

/// Upper bound on a decoded artifact (1 GiB).
pub const MAX_ARTIFACT_BYTES: u64 = 1 << 30;

#[allow(clippy::cast_possible_truncation)]
const DECODE_LIMIT: usize = MAX_ARTIFACT_BYTES as usize;

fn artifact_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

pub(crate) fn encode_artifact<T: Serialize>(value: &T, artifact: ArtifactKind) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, artifact_config())
        .map_err(|err| RetrievalError::config(artifact, format!("encode failed: {err}")))
}

/// Decode a whole artifact; trailing bytes are rejected.
pub(crate) fn decode_artifact<T: DeserializeOwned>(bytes: &[u8], artifact: ArtifactKind) -> Result<T> {
    let (value, read) = bincode::serde::decode_from_slice::<T, _>(
        bytes,
        bincode::config::standard()
            .with_fixed_int_encoding()
            .with_little_endian()
            .with_limit::<DECODE_LIMIT>(),
    )
    .map_err(|err| RetrievalError::config(artifact, format!("decode failed: {err}")))?;

    if read != bytes.len() {
        return Err(RetrievalError::config(
            artifact,
            format!("expected {} bytes, read {}", bytes.len(), read),
        ));
    }

    tracing::debug!(%artifact, bytes_len = bytes.len(), "decoded artifact");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_artifact(&vec![1.0f32, 2.0], ArtifactKind::Index).expect("encode");
        bytes.push(0);
        let err = decode_artifact::<Vec<f32>>(&bytes, ArtifactKind::Index).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.artifact(), Some(ArtifactKind::Index));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = encode_artifact(&vec![1.0f32, 2.0, 3.0], ArtifactKind::Projection).expect("encode");
        let err = decode_artifact::<Vec<f32>>(&bytes[..bytes.len() - 2], ArtifactKind::Projection)
            .unwrap_err();
        assert_eq!(err.artifact(), Some(ArtifactKind::Projection));
    }
}
