// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A hand-rolled, singly-owned skip list with a fixed fan-out of 5
//! (`spec.md` §4.5), grounded on `original_source/tsdbMain.c`'s
//! `tSkipListCreate(5, TSDB_DATA_TYPE_TIMESTAMP, ...)` call.
//!
//! The teacher's own skip list (`memtable/skiplist/`, via `crossbeam_skiplist`)
//! is lock-free and concurrent, built for a multi-reader/multi-writer LSM
//! memtable, and is a `Map` (one value per key). Neither property fits here:
//! this memtable has exactly one writer (`spec.md` §5, "single writer
//! thread"), so lock-freedom buys nothing, and rows with a duplicate
//! timestamp key must all be kept, in insertion order, rather than
//! overwriting one another. A plain, index-arena-based skip list with a
//! fixed, spec-mandated fan-out expresses that directly; `crossbeam_skiplist`
//! does not expose a fan-out knob at all.

const MAX_LEVEL: usize = 16;
const FAN_OUT: u32 = 5;

struct Node<V> {
    key: i64,
    value: V,
    next: Vec<Option<usize>>,
}

/// An insertion-ordered, duplicate-key-permitting skip list keyed by `i64`.
pub struct SkipList<V> {
    nodes: Vec<Node<V>>,
    head: Vec<Option<usize>>,
    top_level: usize,
    len: usize,
    rng: Xorshift64,
}

impl<V> Default for SkipList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SkipList<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: vec![None; MAX_LEVEL],
            top_level: 1,
            len: 0,
            rng: Xorshift64::seeded(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `(key, value)`. If one or more nodes with the same key are
    /// already present, the new node is placed after all of them, so
    /// iteration yields same-key rows in the order they were inserted.
    pub fn insert(&mut self, key: i64, value: V) {
        let level = self.random_level();
        if level > self.top_level {
            self.top_level = level;
        }

        let mut update = [None; MAX_LEVEL];
        let mut cursor: Option<usize> = None;

        for lvl in (0..MAX_LEVEL).rev() {
            loop {
                let next = match cursor {
                    Some(idx) => self.nodes[idx].next[lvl],
                    None => self.head[lvl],
                };
                match next {
                    Some(idx) if self.nodes[idx].key <= key => cursor = Some(idx),
                    _ => break,
                }
            }
            update[lvl] = cursor;
        }

        let new_idx = self.nodes.len();
        let mut next = vec![None; level];
        for (lvl, slot) in next.iter_mut().enumerate() {
            *slot = match update[lvl] {
                Some(idx) => self.nodes[idx].next[lvl],
                None => self.head[lvl],
            };
        }
        self.nodes.push(Node { key, value, next });

        for lvl in 0..level {
            match update[lvl] {
                Some(idx) => self.nodes[idx].next[lvl] = Some(new_idx),
                None => self.head[lvl] = Some(new_idx),
            }
        }

        self.len += 1;
    }

    /// Iterates `(key, &value)` pairs in ascending key order, preserving
    /// insertion order among equal keys.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &V)> {
        let mut cursor = self.head[0];
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = &self.nodes[idx];
            cursor = node.next[0];
            Some((node.key, &node.value))
        })
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.next_u32() % FAN_OUT == 0 {
            level += 1;
        }
        level
    }
}

/// A minimal xorshift64* generator, used only to pick skip-list node
/// heights; not cryptographically meaningful.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn seeded() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15);
        Self { state: nanos | 1 }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_ascending_key_order() {
        let mut list = SkipList::new();
        for key in [5, 1, 3, 4, 2] {
            list.insert(key, key);
        }
        let keys: Vec<_> = list.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn preserves_insertion_order_for_duplicate_keys() {
        let mut list = SkipList::new();
        list.insert(10, "first");
        list.insert(10, "second");
        list.insert(10, "third");
        let values: Vec<_> = list.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!["first", "second", "third"]);
    }

    #[test]
    fn len_tracks_total_inserts_including_duplicates() {
        let mut list = SkipList::new();
        for k in [1, 1, 2, 3, 3, 3] {
            list.insert(k, ());
        }
        assert_eq!(list.len(), 6);
    }

    #[test]
    fn handles_large_sorted_insert_volume() {
        let mut list = SkipList::new();
        for k in (0..2000).rev() {
            list.insert(k, k);
        }
        let keys: Vec<_> = list.iter().map(|(k, _)| k).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(keys.len(), 2000);
    }
}
