//! Keyed waiter table (§4.1): first-writer-wins rendezvous, used both as a
//! broadcast dedup set and as the synchronous request/response rendezvous.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

struct Entry<T> {
    value: T,
    inserted_at: Instant,
}

/// Linearizable put/contains/get over a bounded map of `uuid -> T`.
///
/// When the table exceeds `cap` entries, the oldest half is evicted. `cap`
/// is conventionally `listen_cap * 100` (§4.4).
pub struct WaiterTable<T> {
    inner: Mutex<HashMap<u32, Entry<T>>>,
    cap: usize,
}

impl<T: Clone> WaiterTable<T> {
    pub fn new(cap: usize) -> Self {
        WaiterTable {
            inner: Mutex::new(HashMap::new()),
            cap,
        }
    }

    /// Insert `value` under `uuid` unless already present. Returns `true` if
    /// this call performed the insert (i.e. this is the first writer).
    pub fn put(&self, uuid: u32, value: T) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.contains_key(&uuid) {
            return false;
        }
        guard.insert(
            uuid,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        let len = guard.len();
        if len > self.cap {
            evict_oldest_locked(&mut guard, len / 2);
        }
        true
    }

    pub fn contains(&self, uuid: u32) -> bool {
        self.inner.lock().unwrap().contains_key(&uuid)
    }

    pub fn get(&self, uuid: u32) -> Option<T> {
        self.inner
            .lock()
            .unwrap()
            .get(&uuid)
            .map(|e| e.value.clone())
    }

    /// Evict the `k` oldest entries (by insertion time).
    pub fn evict_oldest(&self, k: usize) {
        let mut guard = self.inner.lock().unwrap();
        evict_oldest_locked(&mut guard, k);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest_locked<T>(map: &mut HashMap<u32, Entry<T>>, k: usize) {
    if k == 0 {
        return;
    }
    let mut by_age: Vec<(u32, Instant)> = map.iter().map(|(k, v)| (*k, v.inserted_at)).collect();
    by_age.sort_by_key(|(_, t)| *t);
    for (uuid, _) in by_age.into_iter().take(k) {
        map.remove(&uuid);
    }
}

/// How long a waiter-table entry may be polled against before giving up;
/// used by the sender (§4.8), not enforced by the table itself.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let table: WaiterTable<&str> = WaiterTable::new(100);
        assert!(table.put(1, "first"));
        assert!(!table.put(1, "second"));
        assert_eq!(table.get(1), Some("first"));
    }

    #[test]
    fn contains_and_get_reflect_state() {
        let table: WaiterTable<i32> = WaiterTable::new(100);
        assert!(!table.contains(7));
        table.put(7, 42);
        assert!(table.contains(7));
        assert_eq!(table.get(7), Some(42));
        assert_eq!(table.get(8), None);
    }

    #[test]
    fn exceeding_cap_evicts_oldest_half() {
        let table: WaiterTable<u32> = WaiterTable::new(4);
        for i in 0..5 {
            table.put(i, i);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(table.len() <= 4);
        // the most recently inserted entry must survive the eviction
        assert!(table.contains(4));
    }

    #[test]
    fn evict_oldest_removes_requested_count() {
        let table: WaiterTable<u32> = WaiterTable::new(1000);
        for i in 0..10 {
            table.put(i, i);
            std::thread::sleep(Duration::from_millis(1));
        }
        table.evict_oldest(3);
        assert_eq!(table.len(), 7);
    }
}
