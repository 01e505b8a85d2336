//! Block checksums
//!
//! A block is named by the digest of its decompressed content: SHA-512,
//! hex encoded and truncated to 64 characters.

use sha2::{Digest, Sha512};
use thiserror::Error;

/// Length of a block checksum in hex characters
pub const CHECKSUM_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Compute the checksum of decompressed block content
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    finish(hasher)
}

/// Verify that data matches the expected checksum
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), ChecksumError> {
    let actual = compute_checksum(data);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ChecksumError::Mismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn finish(hasher: Sha512) -> String {
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(CHECKSUM_LEN);
    digest
}
