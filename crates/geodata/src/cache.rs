use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: u64,
}

/// Key/value store bounded by entry count, evicting in insertion order.
///
/// Notes on policy:
/// - Eviction is strict FIFO by insertion sequence. Reads do not refresh an
///   entry's position.
/// - Re-putting an existing key counts as a fresh insertion: it moves to the
///   back of the eviction order.
/// - `BTreeMap`s keep traversal order stable.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    max_entries: usize,
    next_seq: u64,
    entries: BTreeMap<K, CacheEntry<V>>,
    order: BTreeMap<u64, K>,
}

impl<K: Ord + Clone, V> BoundedCache<K, V> {
    /// `max_entries` is clamped to at least one.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            next_seq: 0,
            entries: BTreeMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Inserts `value` and returns the keys evicted to stay within bounds.
    pub fn put(&mut self, key: K, value: V) -> Vec<K> {
        if let Some(old) = self.entries.remove(&key) {
            self.order.remove(&old.inserted_at);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: seq,
            },
        );

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_entries {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    /// Keys from oldest to newest insertion.
    pub fn keys_by_age(&self) -> impl Iterator<Item = &K> {
        self.order.values()
    }
}
