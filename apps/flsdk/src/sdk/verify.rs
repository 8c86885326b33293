//! Checksum verification for downloaded SDK archives.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::errors::SdkError;

/// Verifies that a file matches the expected SHA-256 checksum.
///
/// The comparison ignores case and surrounding whitespace in `expected`.
///
/// # Errors
///
/// Returns `ChecksumMismatch` if the digests differ, or `DownloadFailed`
/// if the file cannot be read.
pub fn verify_checksum(file_path: &Path, expected: &str) -> Result<(), SdkError> {
    let computed = compute_sha256(file_path).map_err(|e| {
        SdkError::download_failed_with_source(
            file_path.display().to_string(),
            "could not hash the downloaded archive",
            e,
        )
    })?;

    let expected = expected.trim().to_lowercase();
    if computed != expected {
        return Err(SdkError::checksum_mismatch(file_path, expected, computed));
    }

    tracing::debug!("Checksum verified for {}", file_path.display());
    Ok(())
}

/// Computes the SHA-256 of a file as a lowercase hex string.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn compute_sha256(file_path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(file_path)
        .with_context(|| format!("Failed to open file for checksum: {}", file_path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer).with_context(|| {
            format!("Failed to read file for checksum: {}", file_path.display())
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
