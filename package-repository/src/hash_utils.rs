//! Cryptographic hashing utilities for package integrity verification

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Name of the algorithm recorded next to every stored archive.
pub const HASH_ALGORITHM: &str = "SHA512";

/// Calculate the SHA512 hash of data as standard base64.
///
/// This is the value written to the `.sha512` sidecar of every stored
/// archive and compared on read.
///
/// # Examples
///
/// ```
/// # use package_repository::hash_utils::sha512_base64;
/// let hash = sha512_base64(b"hello world");
/// assert_eq!(hash.len(), 88); // 64 bytes -> 88 base64 characters
/// ```
pub fn sha512_base64(data: &[u8]) -> String {
    use sha2::{Digest, Sha512};
    let mut hasher = Sha512::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}
