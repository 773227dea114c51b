use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// A bucket holds up to `bucket_size_limit` mappings plus its local
/// depth. Buckets are shared: several directory slots may point at the
/// same bucket until a split separates them.
struct Bucket<K, V> {
    local_depth: u32,
    items: HashMap<K, V>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            local_depth,
            items: HashMap::new(),
        }
    }
}

type BucketRef<K, V> = Arc<Mutex<Bucket<K, V>>>;

struct Directory<K, V> {
    global_depth: u32,
    bucket_size_limit: usize,
    slots: Vec<BucketRef<K, V>>,
}

impl<K: Hash, V> Directory<K, V> {
    fn bucket_index(&self, key: &K) -> usize {
        (hash_key(key) as usize) & ((1usize << self.global_depth) - 1)
    }
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Extendible hash table: a directory of shared bucket references that
/// doubles when a full bucket's local depth reaches the global depth.
/// The directory never shrinks. All operations are serialized by one
/// mutex; the per-bucket locks only guard the shared references.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new(bucket_size_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Directory {
                global_depth: 0,
                bucket_size_limit,
                slots: vec![Arc::new(Mutex::new(Bucket::new(0)))],
            }),
        }
    }

    /// Look up the value bound to `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.inner.lock();
        let bucket = dir.slots[dir.bucket_index(key)].lock();
        bucket.items.get(key).cloned()
    }

    /// Erase the mapping for `key`. Returns whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let dir = self.inner.lock();
        let mut bucket = dir.slots[dir.bucket_index(key)].lock();
        bucket.items.remove(key).is_some()
    }

    /// Insert (or overwrite) a mapping, splitting the target bucket —
    /// and doubling the directory when its local depth has caught up
    /// with the global depth — until the pair fits.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.inner.lock();
        loop {
            let index = dir.bucket_index(&key);
            let target = dir.slots[index].clone();
            let mut bucket = target.lock();

            if bucket.items.contains_key(&key) || bucket.items.len() < dir.bucket_size_limit {
                bucket.items.insert(key, value);
                return;
            }

            // Bucket is full. Double the directory if this bucket is
            // referenced by a single slot pattern already.
            if bucket.local_depth == dir.global_depth {
                let len = dir.slots.len();
                for i in 0..len {
                    let dup = dir.slots[i].clone();
                    dir.slots.push(dup);
                }
                dir.global_depth += 1;
            }

            // Split on the bit just above the old local depth.
            let mask = 1usize << bucket.local_depth;
            let mut low = Bucket::new(bucket.local_depth + 1);
            let mut high = Bucket::new(bucket.local_depth + 1);
            for (k, v) in bucket.items.drain() {
                if (hash_key(&k) as usize) & mask != 0 {
                    high.items.insert(k, v);
                } else {
                    low.items.insert(k, v);
                }
            }
            drop(bucket);

            let low = Arc::new(Mutex::new(low));
            let high = Arc::new(Mutex::new(high));
            for i in 0..dir.slots.len() {
                if Arc::ptr_eq(&dir.slots[i], &target) {
                    dir.slots[i] = if i & mask != 0 { high.clone() } else { low.clone() };
                }
            }
            // Retry: the rehashed target may still be full.
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, slot: usize) -> u32 {
        self.inner.lock().slots[slot].lock().local_depth
    }

    /// Number of distinct buckets behind the directory.
    pub fn num_buckets(&self) -> usize {
        let dir = self.inner.lock();
        let mut seen: Vec<*const Mutex<Bucket<K, V>>> = Vec::new();
        for slot in &dir.slots {
            let ptr = Arc::as_ptr(slot);
            if !seen.contains(&ptr) {
                seen.push(ptr);
            }
        }
        seen.len()
    }

    /// Total number of mappings.
    pub fn size(&self) -> usize {
        let dir = self.inner.lock();
        let mut seen: Vec<*const Mutex<Bucket<K, V>>> = Vec::new();
        let mut total = 0;
        for slot in &dir.slots {
            let ptr = Arc::as_ptr(slot);
            if !seen.contains(&ptr) {
                seen.push(ptr);
                total += slot.lock().items.len();
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find_remove() {
        let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(4);
        table.insert(1, "a".to_string());
        table.insert(2, "b".to_string());

        assert_eq!(table.find(&1), Some("a".to_string()));
        assert_eq!(table.find(&2), Some("b".to_string()));
        assert_eq!(table.find(&3), None);

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_overwrite_existing_key() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
        table.insert(7, 1);
        table.insert(7, 2);
        assert_eq!(table.find(&7), Some(2));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_directory_doubles_under_load() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
        for i in 0..64 {
            table.insert(i, i * 10);
        }
        assert!(table.global_depth() > 0);
        assert!(table.num_buckets() > 1);
        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert_eq!(table.size(), 64);
    }

    #[test]
    fn test_local_depth_bounded_by_global() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(1);
        for i in 0..32 {
            table.insert(i, i);
        }
        let global = table.global_depth();
        for slot in 0..(1usize << global) {
            assert!(table.local_depth(slot) <= global);
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(4));
        let mut handles = Vec::new();
        for t in 0..4 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    table.insert(t * 100 + i, i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.size(), 400);
        for t in 0..4 {
            for i in 0..100 {
                assert_eq!(table.find(&(t * 100 + i)), Some(i));
            }
        }
    }
}
