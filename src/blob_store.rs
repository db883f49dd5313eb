//! Content-addressed blob store (§3, §4.5): flat directory of files named
//! `file.<sha256hex>.dat`.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{error::OverlayError, transport::MAX_RECEIVE_SIZE};

/// Blobs larger than this are rejected by `share_file` (§6, §8 boundary
/// behaviors: `MAX_RECEIVE_SIZE + 1000`).
pub const MAX_BLOB_SIZE: usize = MAX_RECEIVE_SIZE + 1000;

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OverlayError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(BlobStore { dir })
    }

    pub fn hash_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn path_for(&self, hash_hex: &str) -> PathBuf {
        self.dir.join(format!("file.{hash_hex}.dat"))
    }

    pub fn has(&self, hash_hex: &str) -> bool {
        self.path_for(hash_hex).is_file()
    }

    pub fn get(&self, hash_hex: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(hash_hex)).ok()
    }

    /// Store `bytes`, returning its SHA-256 hex digest. Rejects blobs larger
    /// than [`MAX_BLOB_SIZE`].
    pub fn put(&self, bytes: &[u8]) -> Result<String, OverlayError> {
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(OverlayError::FileReceive(format!(
                "blob too large: {} bytes exceeds {MAX_BLOB_SIZE}",
                bytes.len()
            )));
        }
        let hash_hex = Self::hash_hex(bytes);
        let path = self.path_for(&hash_hex);
        if !path.is_file() {
            std::fs::write(&path, bytes)?;
        }
        Ok(hash_hex)
    }

    /// Verify `bytes` hashes to `expected_hash_hex`, then persist it.
    pub fn put_verified(&self, bytes: &[u8], expected_hash_hex: &str) -> Result<(), OverlayError> {
        let actual = Self::hash_hex(bytes);
        if actual != expected_hash_hex {
            return Err(OverlayError::FileReceive(format!(
                "hash mismatch: expected {expected_hash_hex}, got {actual}"
            )));
        }
        self.put(bytes)?;
        Ok(())
    }

    pub fn remove(&self, hash_hex: &str) -> bool {
        let path = self.path_for(hash_hex);
        if path.is_file() {
            std::fs::remove_file(path).is_ok()
        } else {
            false
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let hash = store.put(b"hello overlay").unwrap();
        assert!(store.has(&hash));
        assert_eq!(store.get(&hash).unwrap(), b"hello overlay");
    }

    #[test]
    fn hash_equals_sha256_of_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let hash = store.put(b"content").unwrap();
        assert_eq!(hash, BlobStore::hash_hex(b"content"));
    }

    #[test]
    fn oversized_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let big = vec![0u8; MAX_BLOB_SIZE + 1];
        assert!(store.put(&big).is_err());
    }

    #[test]
    fn put_verified_rejects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let result = store.put_verified(b"abc", "not-the-real-hash");
        assert!(result.is_err());
        assert!(!store.has("not-the-real-hash"));
    }

    #[test]
    fn remove_deletes_existing_blob_and_is_noop_otherwise() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let hash = store.put(b"to be deleted").unwrap();
        assert!(store.remove(&hash));
        assert!(!store.has(&hash));
        assert!(!store.remove(&hash));
    }
}
