#![forbid(unsafe_code)]

//! Key-to-position index backing the collection's O(1) lookups.
//!
//! # Invariants
//!
//! 1. After every public collection operation, `get(key(items[i])).idx == i`
//!    for every valid `i` (the index is never stale).
//! 2. `len()` equals the number of elements in the collection.
//! 3. Auxiliary entry flags survive re-positioning: overwriting an entry's
//!    position keeps its flags.
//!
//! The map itself is total: `get` on an absent key is `None`, never an
//! error. Key ordering is not defined.

use ahash::AHashMap;
use bitflags::bitflags;
use std::hash::Hash;

bitflags! {
    /// Auxiliary per-entry state carried alongside the positional index.
    ///
    /// A grid consumer typically parks row visibility here; the collection
    /// itself only guarantees the flags travel with the key across moves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// Entry is present but not displayed by the consumer.
        const HIDDEN = 1 << 0;
        /// Entry is marked by the consumer (selection, pinning, ...).
        const MARKED = 1 << 1;
    }
}

/// Per-key context: current position plus auxiliary flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCtx {
    pub idx: usize,
    pub flags: EntryFlags,
}

impl EntryCtx {
    #[must_use]
    pub fn at(idx: usize) -> Self {
        Self {
            idx,
            flags: EntryFlags::empty(),
        }
    }
}

/// Hash map from element key to [`EntryCtx`]. All operations are O(1)
/// amortized.
#[derive(Debug, Clone)]
pub struct KeyedIndex<K> {
    map: AHashMap<K, EntryCtx>,
}

impl<K: Eq + Hash> KeyedIndex<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: AHashMap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&EntryCtx> {
        self.map.get(key)
    }

    #[must_use]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut EntryCtx> {
        self.map.get_mut(key)
    }

    /// Record `key` at position `idx`, preserving flags if the key already
    /// has an entry.
    pub fn put(&mut self, key: K, idx: usize) {
        self.map
            .entry(key)
            .and_modify(|ctx| ctx.idx = idx)
            .or_insert_with(|| EntryCtx::at(idx));
    }

    pub fn remove(&mut self, key: &K) -> Option<EntryCtx> {
        self.map.remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Eq + Hash> Default for KeyedIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let mut index = KeyedIndex::new();
        index.put("a", 0);
        index.put("b", 1);

        assert_eq!(index.get(&"a").map(|c| c.idx), Some(0));
        assert_eq!(index.get(&"b").map(|c| c.idx), Some(1));
        assert!(index.contains(&"a"));
        assert_eq!(index.len(), 2);

        let removed = index.remove(&"a").unwrap();
        assert_eq!(removed.idx, 0);
        assert!(!index.contains(&"a"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn absent_key_is_none() {
        let index: KeyedIndex<u32> = KeyedIndex::new();
        assert_eq!(index.get(&99), None);
        assert!(!index.contains(&99));
    }

    #[test]
    fn put_preserves_flags_on_move() {
        let mut index = KeyedIndex::new();
        index.put(7u32, 3);
        index.get_mut(&7).unwrap().flags.insert(EntryFlags::HIDDEN);

        // Re-position the entry; flags must travel with it.
        index.put(7, 9);
        let ctx = index.get(&7).unwrap();
        assert_eq!(ctx.idx, 9);
        assert!(ctx.flags.contains(EntryFlags::HIDDEN));
    }

    #[test]
    fn clear_empties() {
        let mut index = KeyedIndex::new();
        index.put(1u8, 0);
        index.put(2u8, 1);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }
}
