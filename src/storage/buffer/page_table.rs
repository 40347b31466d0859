//! Extendible hash directory.
//!
//! A generic associative map with directory doubling and bucket splits;
//! the buffer pool uses it as the page table (`PageId -> FrameId`). The
//! directory addresses buckets by the low `global_depth` bits of the key
//! hash; each bucket carries a `local_depth <= global_depth` and every
//! directory slot whose low `local_depth` bits match a bucket's signature
//! references that bucket.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

#[derive(Debug)]
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, capacity: usize) -> Self {
        Self {
            local_depth,
            items: Vec::with_capacity(capacity),
        }
    }
}

#[derive(Debug)]
struct Directory<K, V> {
    global_depth: u32,
    /// Directory slots hold indices into the bucket arena; slots alias the
    /// same bucket while its local depth trails the global depth.
    slots: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Thread-safe extendible hash table. All operations serialize on a single
/// internal mutex. The hasher is a type parameter so tests can pin hash
/// values; it defaults to the standard `RandomState`.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hasher: S,
    state: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    /// Start at global depth 1 with two empty buckets.
    pub fn with_hasher(bucket_size: usize, hasher: S) -> Self {
        assert!(bucket_size >= 1, "bucket size must be positive");
        let state = Directory {
            global_depth: 1,
            slots: vec![0, 1],
            buckets: vec![Bucket::new(1, bucket_size), Bucket::new(1, bucket_size)],
        };
        Self {
            bucket_size,
            hasher,
            state: Mutex::new(state),
        }
    }

    fn hash_of(&self, key: &K) -> usize {
        self.hasher.hash_one(key) as usize
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let slot = self.hash_of(key) & ((1 << state.global_depth) - 1);
        let bucket = &state.buckets[state.slots[slot]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Remove the entry stored under `key`; returns whether it existed.
    pub fn remove(&self, key: &K) -> bool {
        let state = &mut *self.state.lock();
        let slot = self.hash_of(key) & ((1 << state.global_depth) - 1);
        let bucket = &mut state.buckets[state.slots[slot]];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite the entry under `key`. Overwrites never split;
    /// inserting into a full bucket splits it (doubling the directory when
    /// the bucket's depth has caught up with the global depth) and retries.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash_of(&key);
        let state = &mut *self.state.lock();

        loop {
            let slot = hash & ((1 << state.global_depth) - 1);
            let bucket_idx = state.slots[slot];
            let bucket = &mut state.buckets[bucket_idx];

            if let Some(entry) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            // Full bucket without the key: grow. The loop is bounded by
            // directory growth even when every entry rehashes to one side.
            if bucket.local_depth == state.global_depth {
                let len = state.slots.len();
                state.slots.extend_from_within(0..len);
                state.global_depth += 1;
            }
            self.split_bucket(state, bucket_idx);
        }
    }

    /// Split one bucket into itself plus a sibling at `local_depth + 1`,
    /// redistributing entries and directory slots by the newly significant
    /// bit.
    fn split_bucket(&self, state: &mut Directory<K, V>, bucket_idx: usize) {
        let old_depth = state.buckets[bucket_idx].local_depth;
        let bit = 1usize << old_depth;

        let sibling_idx = state.buckets.len();
        state
            .buckets
            .push(Bucket::new(old_depth + 1, self.bucket_size));
        state.buckets[bucket_idx].local_depth = old_depth + 1;

        let items = std::mem::take(&mut state.buckets[bucket_idx].items);
        for (k, v) in items {
            let target = if self.hash_of(&k) & bit != 0 {
                sibling_idx
            } else {
                bucket_idx
            };
            state.buckets[target].items.push((k, v));
        }

        for slot in 0..state.slots.len() {
            if state.slots[slot] == bucket_idx && slot & bit != 0 {
                state.slots[slot] = sibling_idx;
            }
        }
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        self.state.lock().global_depth
    }

    /// Local depth of the bucket referenced by the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let state = self.state.lock();
        state.buckets[state.slots[dir_index]].local_depth
    }

    /// Total number of buckets allocated so far.
    pub fn num_buckets(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Number of stored entries, across all buckets.
    pub fn len(&self) -> usize {
        self.state.lock().buckets.iter().map(|b| b.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
