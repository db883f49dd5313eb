//! Peer registry (§3, §4.9): persisted `(host, p2p_port) -> {header, score}`
//! map, loaded on startup and rewritten periodically by the stabilizer.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{error::OverlayError, protocol::{Header, PeerKey}};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub header: Header,
    pub score: i64,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: PeerKey,
    record: PeerRecord,
}

pub struct PeerRegistry {
    inner: Mutex<HashMap<PeerKey, PeerRecord>>,
    path: PathBuf,
}

impl PeerRegistry {
    /// Load `path` if it exists; otherwise start empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, OverlayError> {
        let path = path.into();
        let map = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let entries: Vec<PersistedEntry> = serde_json::from_slice(&bytes)
                .map_err(|e| OverlayError::Codec(format!("peer.dat: {e}")))?;
            entries.into_iter().map(|e| (e.key, e.record)).collect()
        } else {
            HashMap::new()
        };
        Ok(PeerRegistry {
            inner: Mutex::new(map),
            path,
        })
    }

    /// Every persisted record's key must equal `(header.host, header.p2p_port)`
    /// as observed at insertion time — callers supply the key explicitly
    /// rather than deriving it, since the observed host may differ from what
    /// the header itself would claim (§3 invariant, "modulo observation host").
    pub fn upsert(&self, key: PeerKey, header: Header, score: i64) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(key, PeerRecord { header, score });
    }

    /// Insert with the existing score if already present, else `default_score`.
    pub fn store_or_refresh(&self, key: PeerKey, header: Header, default_score: i64) {
        let mut guard = self.inner.lock().unwrap();
        let score = guard.get(&key).map(|r| r.score).unwrap_or(default_score);
        guard.insert(key, PeerRecord { header, score });
    }

    pub fn get(&self, key: &PeerKey) -> Option<PeerRecord> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &PeerKey) -> Option<PeerRecord> {
        self.inner.lock().unwrap().remove(key)
    }

    pub fn set_score(&self, key: &PeerKey, score: i64) {
        if let Some(record) = self.inner.lock().unwrap().get_mut(key) {
            record.score = score;
        }
    }

    pub fn all(&self) -> Vec<(PeerKey, PeerRecord)> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<(), OverlayError> {
        save_at(&self.path, &self.inner.lock().unwrap())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), OverlayError> {
        save_at(path, &self.inner.lock().unwrap())
    }
}

fn save_at(path: &Path, map: &HashMap<PeerKey, PeerRecord>) -> Result<(), OverlayError> {
    let entries: Vec<PersistedEntry> = map
        .iter()
        .map(|(k, v)| PersistedEntry {
            key: k.clone(),
            record: v.clone(),
        })
        .collect();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(&entries)
        .map_err(|e| OverlayError::Codec(format!("peer.dat: {e}")))?;
    std::fs::write(path, bytes)?;
    Ok(())
}
