use std::collections::HashMap;

use crate::keyspace::{hash_key, in_interval};

// In-memory key/value store of one peer. Concurrency control lives with the
// owning Peer (a tokio RwLock); this type is the plain map plus the arc
// selection used for key transfer on membership change.
#[derive(Debug, Default)]
pub struct Storage {
    map: HashMap<String, String>,
}

impl Storage {
    pub fn new() -> Self {
        Storage {
            map: HashMap::new(),
        }
    }

    // Get a value by key
    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    // Insert a key-value pair, last write wins
    pub fn put(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    // Merge a batch of incoming keys (receive_keys / transfer on join)
    pub fn merge(&mut self, entries: HashMap<String, String>) {
        self.map.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.clone()
    }

    // Remove and return every key whose hash falls in (lower, upper] on the
    // m-bit ring. This is the arc a new predecessor claims.
    pub fn take_arc(&mut self, lower: u64, upper: u64, m: u32) -> HashMap<String, String> {
        let moving: Vec<String> = self
            .map
            .keys()
            .filter(|k| in_interval(hash_key(k, m), lower, upper, false, true))
            .cloned()
            .collect();

        let mut taken = HashMap::new();
        for key in moving {
            if let Some(value) = self.map.remove(&key) {
                taken.insert(key, value);
            }
        }
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_put_get() {
        let mut storage = Storage::new();
        storage.put("key1".to_string(), "value1".to_string());
        assert_eq!(storage.get("key1"), Some("value1".to_string()));
    }

    #[test]
    fn test_storage_get_nonexistent() {
        let storage = Storage::new();
        assert_eq!(storage.get("nonexistent"), None);
    }

    #[test]
    fn test_storage_last_write_wins() {
        let mut storage = Storage::new();
        storage.put("key1".to_string(), "old".to_string());
        storage.put("key1".to_string(), "new".to_string());
        assert_eq!(storage.get("key1"), Some("new".to_string()));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_take_arc_splits_at_boundaries() {
        let m = 7;
        let mut storage = Storage::new();
        // Pick keys with known ring positions
        let keys: Vec<String> = (0..200).map(|i| format!("key-{}", i)).collect();
        for k in &keys {
            storage.put(k.clone(), "v".to_string());
        }

        let lower = 40;
        let upper = 90;
        let taken = storage.take_arc(lower, upper, m);

        assert!(!taken.is_empty());
        for k in taken.keys() {
            assert!(in_interval(hash_key(k, m), lower, upper, false, true));
        }
        for k in storage.snapshot().keys() {
            assert!(!in_interval(hash_key(k, m), lower, upper, false, true));
        }
        // Conservation: nothing lost, nothing duplicated
        assert_eq!(taken.len() + storage.len(), keys.len());
    }

    #[test]
    fn test_take_arc_wrap_around() {
        let m = 7;
        let mut storage = Storage::new();
        for i in 0..200 {
            storage.put(format!("key-{}", i), "v".to_string());
        }

        // Arc crossing zero
        let taken = storage.take_arc(120, 10, m);
        for k in taken.keys() {
            let id = hash_key(k, m);
            assert!(id > 120 || id <= 10);
        }
    }

    #[test]
    fn test_merge_overwrites() {
        let mut storage = Storage::new();
        storage.put("a".to_string(), "1".to_string());

        let mut incoming = HashMap::new();
        incoming.insert("a".to_string(), "2".to_string());
        incoming.insert("b".to_string(), "3".to_string());
        storage.merge(incoming);

        assert_eq!(storage.get("a"), Some("2".to_string()));
        assert_eq!(storage.get("b"), Some("3".to_string()));
    }
}
