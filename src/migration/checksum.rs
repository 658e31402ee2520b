//! Checksum calculation for migration files

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of a migration body
///
/// Shown by `status --verbose` and `info` so operators can tell whether a
/// file was edited after it was applied.
///
/// # Returns
///
/// Returns the hexadecimal SHA-256 hash of the content
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();

    format!("{:x}", hash)
}
