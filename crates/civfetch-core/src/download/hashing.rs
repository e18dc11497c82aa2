//! Streaming integrity checks for downloaded files.

use crate::error::{ResolverError, Result};
use crate::registry::RegistryFile;
use blake3::Hasher as Blake3Hasher;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Chunk size for reading files (8MB).
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// Key used in the registry `hashes` map.
    pub fn registry_key(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }
}

/// Hash published by the registry for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedHash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl ExpectedHash {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            value: value.into(),
        }
    }

    /// SHA256 when published, otherwise BLAKE3, otherwise nothing.
    pub fn from_file(file: &RegistryFile) -> Option<Self> {
        [HashAlgorithm::Sha256, HashAlgorithm::Blake3]
            .into_iter()
            .find_map(|algorithm| {
                file.hash(algorithm.registry_key())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|value| Self {
                        algorithm,
                        value: value.to_string(),
                    })
            })
    }
}

/// Compute a file hash as lowercase hex.
pub fn compute_hash(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| ResolverError::io_with_path(e, path))?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let bytes_read = file
                    .read(&mut buffer)
                    .map_err(|e| ResolverError::io_with_path(e, path))?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = Blake3Hasher::new();
            loop {
                let bytes_read = file
                    .read(&mut buffer)
                    .map_err(|e| ResolverError::io_with_path(e, path))?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

/// Verify a file against an expected hash, comparing case-insensitively.
pub fn verify(path: &Path, expected: &ExpectedHash) -> Result<()> {
    let actual = compute_hash(path, expected.algorithm)?;
    let expected_lower = expected.value.trim().to_lowercase();

    if actual == expected_lower {
        Ok(())
    } else {
        Err(ResolverError::HashMismatch {
            expected: expected_lower,
            actual,
        })
    }
}

/// [`verify`] on the blocking pool.
pub async fn verify_async(path: PathBuf, expected: ExpectedHash) -> Result<()> {
    tokio::task::spawn_blocking(move || verify(&path, &expected))
        .await
        .map_err(|e| ResolverError::Io {
            message: format!("Hash task failed: {}", e),
            path: None,
            source: None,
        })?
}
