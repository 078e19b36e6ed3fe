use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use super::{GcId, GcPool};
use crate::gc::gc_limits::MINSTRTABSIZE;

/// Intern table for short strings
/// - Same content always maps to the same object
/// - Power-of-two bucket array, grown when the load reaches one and shrunk
///   by the collector when less than a quarter is used
/// - Long strings are never interned
pub struct StringInterner {
    buckets: Vec<Vec<GcId>>,
    /// Number of interned strings
    nuse: usize,
    hashbuilder: RandomState,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); MINSTRTABSIZE],
            nuse: 0,
            hashbuilder: RandomState::new(),
        }
    }

    #[inline(always)]
    pub fn hash_string(&self, s: &str) -> u64 {
        let mut hasher = self.hashbuilder.build_hasher();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[inline(always)]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Look up an interned short string
    pub fn find(&self, pool: &GcPool, s: &str, hash: u64) -> Option<GcId> {
        self.buckets[self.bucket_of(hash)].iter().copied().find(|&id| {
            pool[id]
                .as_string()
                .is_some_and(|ls| ls.hash() == hash && ls.as_str() == s)
        })
    }

    pub fn insert(&mut self, id: GcId, hash: u64) {
        let b = self.bucket_of(hash);
        self.buckets[b].push(id);
        self.nuse += 1;
    }

    /// Remove a freed string
    pub fn remove(&mut self, id: GcId, hash: u64) {
        let b = self.bucket_of(hash);
        let bucket = &mut self.buckets[b];
        if let Some(pos) = bucket.iter().position(|&x| x == id) {
            bucket.swap_remove(pos);
            self.nuse -= 1;
        }
    }

    /// Rehash into `new_size` buckets (a power of two)
    pub fn resize(&mut self, pool: &GcPool, new_size: usize) {
        debug_assert!(new_size.is_power_of_two());
        let mut buckets = vec![Vec::new(); new_size];
        for id in self.buckets.drain(..).flatten() {
            if let Some(ls) = pool[id].as_string() {
                buckets[(ls.hash() as usize) & (new_size - 1)].push(id);
            }
        }
        self.buckets = buckets;
    }

    /// Number of interned strings
    #[inline]
    pub fn nuse(&self) -> usize {
        self.nuse
    }

    /// Number of buckets
    #[inline]
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Bytes accounted for a bucket array of `size` entries
    pub fn table_bytes(size: usize) -> usize {
        size * std::mem::size_of::<usize>()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
