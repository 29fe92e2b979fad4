//! Archive content hashing.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{OtaError, OtaResult};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 of the file at `path` as uppercase hex without separators.
pub fn compute_hash(path: &Path) -> OtaResult<String> {
    let file = File::open(path).map_err(|e| OtaError::io("open archive for hashing", path, e))?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| OtaError::io("read archive for hashing", path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode_upper(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, same format as [`compute_hash`].
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(bytes))
}

/// Compare two hex digests ignoring case and surrounding whitespace.
pub fn hashes_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_hash_known_vector() {
        // SHA-256("test")
        assert_eq!(
            hash_bytes(b"test"),
            "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08"
        );
    }

    #[test]
    fn test_compute_hash_matches_in_memory_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("archive.zip");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        File::create(&path).unwrap().write_all(&data).unwrap();

        let first = compute_hash(&path).unwrap();
        let second = compute_hash(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, hash_bytes(&data));
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_single_byte_mutation_changes_hash() {
        let mut data = vec![7u8; 4096];
        let before = hash_bytes(&data);
        data[2048] ^= 0x01;
        assert_ne!(before, hash_bytes(&data));
    }

    #[test]
    fn test_compute_hash_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = compute_hash(&temp_dir.path().join("missing.zip"));
        assert!(matches!(result, Err(OtaError::Io { .. })));
    }

    #[test]
    fn test_hashes_match_ignores_case() {
        assert!(hashes_match("abcdef", "ABCDEF"));
        assert!(hashes_match(" ABCDEF\n", "ABCDEF"));
        assert!(!hashes_match("ABCDEF", "ABCDEE"));
    }
}
