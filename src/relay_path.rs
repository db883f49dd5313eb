//! File-relay path table (§3, §4.5): `uuid -> (requester, chosen_relay)`,
//! used to validate that a FILE_GET response actually comes from the
//! neighbor this node asked (loop-and-spoof suppression).

use std::{collections::HashMap, sync::Mutex, time::Instant};

use crate::transport::NeighborHandle;

/// Who asked us for a file: either our own local API (`get_file`) or a
/// neighbor relaying a FILE_GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Local,
    Neighbor(NeighborHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPathEntry {
    pub requester: Requester,
    pub ship_to: NeighborHandle,
}

struct Record {
    entry: RelayPathEntry,
    inserted_at: Instant,
}

pub struct RelayPathTable {
    inner: Mutex<HashMap<u32, Record>>,
    cap: usize,
}

impl RelayPathTable {
    pub fn new(cap: usize) -> Self {
        RelayPathTable {
            inner: Mutex::new(HashMap::new()),
            cap,
        }
    }

    pub fn insert(&self, uuid: u32, entry: RelayPathEntry) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(
            uuid,
            Record {
                entry,
                inserted_at: Instant::now(),
            },
        );
        let len = guard.len();
        if len > self.cap {
            let keep_from = len / 2;
            let mut by_age: Vec<(u32, Instant)> =
                guard.iter().map(|(k, v)| (*k, v.inserted_at)).collect();
            by_age.sort_by_key(|(_, t)| *t);
            for (uuid, _) in by_age.into_iter().take(keep_from) {
                guard.remove(&uuid);
            }
        }
    }

    pub fn get(&self, uuid: u32) -> Option<RelayPathEntry> {
        self.inner.lock().unwrap().get(&uuid).map(|r| r.entry.clone())
    }

    pub fn contains(&self, uuid: u32) -> bool {
        self.inner.lock().unwrap().contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The origin check of §4.5: a RESPONSE for `uuid` is only accepted if it
    /// arrived from the neighbor this node actually asked.
    pub fn accepts_response_from(&self, uuid: u32, from: &NeighborHandle) -> bool {
        match self.get(uuid) {
            Some(entry) => entry.ship_to.id == from.id,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;

    fn neighbor(name: &str) -> NeighborHandle {
        NeighborHandle::new(
            "127.0.0.1",
            4000,
            Header {
                name: name.to_string(),
                p2p_port: 4000,
                p2p_accept: true,
            },
        )
    }

    #[test]
    fn origin_check_accepts_only_the_asked_neighbor() {
        let table = RelayPathTable::new(1000);
        let asked = neighbor("B");
        let impostor = neighbor("D");
        table.insert(
            42,
            RelayPathEntry {
                requester: Requester::Local,
                ship_to: asked.clone(),
            },
        );
        assert!(table.accepts_response_from(42, &asked));
        assert!(!table.accepts_response_from(42, &impostor));
    }

    #[test]
    fn unknown_uuid_is_rejected() {
        let table = RelayPathTable::new(1000);
        assert!(!table.accepts_response_from(1, &neighbor("X")));
    }
}
