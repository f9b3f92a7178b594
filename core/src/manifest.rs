//! Optional `manifest.json` describing a bundle: its version, the dimensions
//! the artifacts were fitted with, and SHA-256 digests of every file.

use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ArtifactKind, Result, RetrievalError};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BundleManifest {
    pub schema_version: u32,
    pub version: String,
    pub embedding_dim: Option<u32>,
    pub reduced_dim: Option<u32>,
    pub count: Option<u64>,
    pub files: Vec<ManifestEntry>,
}

impl Default for BundleManifest {
    fn default() -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            version: String::new(),
            embedding_dim: None,
            reduced_dim: None,
            count: None,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
}

fn invalid(reason: impl Into<std::borrow::Cow<'static, str>>) -> RetrievalError {
    RetrievalError::config(ArtifactKind::Manifest, reason)
}

impl BundleManifest {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|err| invalid(format!("failed to parse manifest: {err}")))?;

        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(invalid(format!(
                "unsupported schema version {} (expected {MANIFEST_SCHEMA_VERSION})",
                manifest.schema_version
            )));
        }
        if manifest.version.trim().is_empty() {
            return Err(invalid("manifest version is empty"));
        }
        for entry in &manifest.files {
            validate_entry(entry)?;
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|err| invalid(format!("encode failed: {err}")))
    }

    /// Record the digest of `relative` (resolved against `dir`), replacing any existing entry.
    pub fn record_file(&mut self, dir: &Path, relative: &str) -> Result<()> {
        let path = resolve_entry_path(dir, relative)?;
        let sha256 = compute_sha256_hex(&path)?;
        match self.files.iter_mut().find(|entry| entry.path == relative) {
            Some(entry) => entry.sha256 = sha256,
            None => self.files.push(ManifestEntry {
                path: relative.to_string(),
                sha256,
            }),
        }
        Ok(())
    }

    /// Check every listed file exists under `dir` and matches its digest.
    pub fn verify_files(&self, dir: &Path) -> Result<()> {
        self.verify_loaded(dir, &[])
    }

    /// Like [`verify_files`](Self::verify_files), but entries named in
    /// `loaded` are hashed from those buffers instead of being read again.
    pub fn verify_loaded(&self, dir: &Path, loaded: &[(&str, &[u8])]) -> Result<()> {
        for entry in &self.files {
            let expected = normalize_sha256(&entry.sha256, &entry.path)?;
            let path = resolve_entry_path(dir, &entry.path)?;
            let actual = match loaded.iter().find(|(name, _)| *name == entry.path) {
                Some((_, bytes)) => sha256_hex(bytes),
                None if path.is_file() => compute_sha256_hex(&path)?,
                None => return Err(invalid(format!("listed file missing: {}", entry.path))),
            };
            if actual != expected {
                return Err(invalid(format!(
                    "checksum mismatch for {} (expected {expected}, got {actual})",
                    entry.path
                )));
            }
        }
        tracing::debug!(files = self.files.len(), "verified manifest checksums");
        Ok(())
    }

    /// Compare declared dimensions and catalog size against the decoded artifacts.
    pub fn check_shape(&self, embedding_dim: usize, reduced_dim: usize, count: usize) -> Result<()> {
        let declared = [
            ("embedding-dim", self.embedding_dim.map(u64::from), embedding_dim),
            ("reduced-dim", self.reduced_dim.map(u64::from), reduced_dim),
            ("count", self.count, count),
        ];
        for (field, declared, actual) in declared {
            if let Some(declared) = declared {
                if declared != actual as u64 {
                    return Err(invalid(format!(
                        "{field} is {declared} but artifacts have {actual}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_entry(entry: &ManifestEntry) -> Result<()> {
    if entry.path.trim().is_empty() {
        return Err(invalid("file entry path is empty"));
    }
    if entry.path.contains('\\') {
        return Err(invalid(format!(
            "file entry path must use forward slashes: {}",
            entry.path
        )));
    }
    normalize_sha256(&entry.sha256, &entry.path)?;
    Ok(())
}

fn normalize_sha256(value: &str, context: &str) -> Result<String> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix("sha256:").unwrap_or(trimmed);
    if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid(format!("invalid sha256 value for {context}")));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn resolve_entry_path(base: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    if path.is_absolute() {
        return Err(invalid(format!("file entry '{relative}' must be relative")));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(invalid(format!(
            "file entry '{relative}' attempts directory traversal"
        )));
    }
    Ok(base.join(path))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn compute_sha256_hex(path: &Path) -> Result<String> {
    let file = fs_err::File::open(path)
        .map_err(|err| RetrievalError::io(ArtifactKind::Manifest, path, err))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| RetrievalError::io(ArtifactKind::Manifest, path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
