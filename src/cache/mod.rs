// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The write cache: a process-wide, slab-allocated memory pool shared by
//! every table's memtable (`spec.md` §4.4).
//!
//! Tracks the active generation (`mem`), the one the writer thread is
//! currently appending to, and a `pool` of empty slabs recycled once a
//! commit finishes successfully. [`Cache::freeze`] moves `mem` out by value
//! (a `Vec` move, not a copy of its bytes) and installs a fresh, empty
//! active generation; the returned [`FrozenCache`] is then owned outright
//! by whoever is committing it — no further synchronization on this struct
//! is needed to read it (`spec.md` §4.4, §9 "Background thread + shared
//! pointers": "message-passing ... is an equally valid model").

mod arena;

pub use arena::RowHandle;
use arena::{resolve, Slab};

use crate::error::{Error, Result};

/// The write cache.
pub struct Cache {
    mem: Vec<Slab>,
    pool: Vec<Slab>,
    mem_bytes: u64,
    max_bytes: u64,
}

/// A generation of the cache, frozen by [`Cache::freeze`] and owned by the
/// commit worker for the duration of one commit attempt.
///
/// On a failed commit attempt, a `FrozenCache` is handed back to the
/// repository rather than dropped, so a later `trigger_commit` can retry
/// over the exact same snapshot (`spec.md` §4.4, §7).
pub struct FrozenCache(Vec<Slab>);

impl FrozenCache {
    /// Resolves a handle previously returned by [`Cache::alloc`] against
    /// this frozen generation.
    #[must_use]
    pub fn resolve(&self, handle: RowHandle) -> &[u8] {
        resolve(&self.0, handle)
    }
}

impl Cache {
    /// Creates an empty cache capped at `max_cache_size` bytes of active
    /// (`mem`) data.
    #[must_use]
    pub fn new(max_cache_size: u64) -> Self {
        Self {
            mem: vec![Slab::new()],
            pool: Vec::new(),
            mem_bytes: 0,
            max_bytes: max_cache_size,
        }
    }

    /// Appends `bytes` to the active generation, returning a handle to read
    /// them back.
    ///
    /// Fails with [`Error::ArenaExhausted`] if `bytes` alone would not fit
    /// in a single slab, or if accepting it would exceed `max_cache_size`.
    /// A commit (freeing `mem_bytes` back to zero via [`Cache::freeze`]) is
    /// the only way to make room again; this cache never blocks waiting for
    /// one.
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<RowHandle> {
        if bytes.len() > arena::SLAB_SIZE {
            return Err(Error::ArenaExhausted);
        }
        if self.mem_bytes + bytes.len() as u64 > self.max_bytes {
            return Err(Error::ArenaExhausted);
        }

        let handle = arena::alloc_into(&mut self.mem, &mut self.pool, bytes);
        self.mem_bytes += bytes.len() as u64;
        Ok(handle)
    }

    /// Resolves a handle previously returned by [`Cache::alloc`] against
    /// the active generation.
    #[must_use]
    pub fn read(&self, handle: RowHandle) -> &[u8] {
        resolve(&self.mem, handle)
    }

    /// Bytes currently held in the active generation.
    #[must_use]
    pub fn active_bytes(&self) -> u64 {
        self.mem_bytes
    }

    /// Freezes the active generation, returning it by value, and installs a
    /// fresh, empty active generation (reusing a pooled slab when one is
    /// available).
    ///
    /// Callers must hold the repository mutex across this call and the
    /// matching memtable `mem`→`imem` swap, so that no insert can land rows
    /// in the generation being frozen (`spec.md` §4.7).
    pub fn freeze(&mut self) -> FrozenCache {
        let frozen = std::mem::replace(&mut self.mem, vec![self.pool.pop().unwrap_or_else(Slab::new)]);
        self.mem_bytes = 0;
        FrozenCache(frozen)
    }

    /// Returns every slab in `frozen` to the pool for reuse.
    ///
    /// Only call this once the commit that froze `frozen` has fully
    /// succeeded; a failed attempt must hand `frozen` back unconsumed so a
    /// retry can read the same rows (`spec.md` §4.4, §7).
    pub fn reclaim(&mut self, frozen: FrozenCache) {
        for mut slab in frozen.0 {
            slab.clear();
            self.pool.push(slab);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_read_back_roundtrip() {
        let mut cache = Cache::new(1024 * 1024);
        let h = cache.alloc(b"hello").unwrap();
        assert_eq!(cache.read(h), b"hello");
    }

    #[test]
    fn rejects_allocation_beyond_cap() {
        let mut cache = Cache::new(16);
        assert!(cache.alloc(&[0u8; 32]).is_err());
    }

    #[test]
    fn spans_multiple_slabs_when_one_fills_up() {
        let mut cache = Cache::new(u64::from(u32::MAX));
        let row = vec![7u8; arena::SLAB_SIZE - 8];
        let h1 = cache.alloc(&row).unwrap();
        let h2 = cache.alloc(&row).unwrap();
        assert_eq!(cache.read(h1), row.as_slice());
        assert_eq!(cache.read(h2), row.as_slice());
    }

    #[test]
    fn freeze_moves_active_rows_into_the_returned_frozen_cache() {
        let mut cache = Cache::new(1024 * 1024);
        let h = cache.alloc(b"row-a").unwrap();

        let frozen = cache.freeze();
        assert_eq!(cache.active_bytes(), 0);
        assert_eq!(frozen.resolve(h), b"row-a");

        let h2 = cache.alloc(b"row-b").unwrap();
        assert_eq!(cache.read(h2), b"row-b");
        // The frozen generation is unaffected by new inserts.
        assert_eq!(frozen.resolve(h), b"row-a");
    }

    #[test]
    fn reclaim_returns_slabs_for_reuse() {
        let mut cache = Cache::new(1024 * 1024);
        cache.alloc(b"row-a").unwrap();
        let frozen = cache.freeze();
        assert!(cache.pool.is_empty());
        cache.reclaim(frozen);
        assert!(!cache.pool.is_empty());
    }

    #[test]
    fn a_failed_commit_can_hand_the_frozen_cache_back_for_retry() {
        let mut cache = Cache::new(1024 * 1024);
        let h = cache.alloc(b"row-a").unwrap();
        let frozen = cache.freeze();
        // The commit failed: the caller keeps `frozen` around instead of
        // calling `reclaim`, and can still resolve handles out of it later.
        assert_eq!(frozen.resolve(h), b"row-a");
    }
}
