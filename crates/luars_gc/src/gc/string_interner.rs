use ahash::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::gc::{GcId, GcPool};

/// String table: every string object is interned, so equal content always
/// maps to the same object and raw equality is identity.
///
/// The table does not keep strings alive; the sweep removes freed strings
/// from it.
pub struct StringInterner {
    // content hash -> string objects with that hash
    map: HashMap<u64, Vec<GcId>, RandomState>,
    hashbuilder: RandomState,
    count: usize,
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hashbuilder: RandomState::new(),
            count: 0,
        }
    }

    #[inline(always)]
    pub fn hash_string(&self, s: &str) -> u64 {
        self.hashbuilder.hash_one(s)
    }

    /// Find an interned string with the given content
    pub fn find(&self, pool: &GcPool, hash: u64, s: &str) -> Option<GcId> {
        let ids = self.map.get(&hash)?;
        ids.iter().copied().find(|&id| {
            pool.get(id)
                .and_then(|o| o.as_string())
                .is_some_and(|ls| ls.len() == s.len() && ls.as_str() == s)
        })
    }

    pub fn insert(&mut self, hash: u64, id: GcId) {
        self.map.entry(hash).or_default().push(id);
        self.count += 1;
    }

    /// luaS_remove: called when a string object is freed
    pub fn remove(&mut self, hash: u64, id: GcId) {
        if let Some(ids) = self.map.get_mut(&hash) {
            let before = ids.len();
            ids.retain(|&i| i != id);
            self.count -= before - ids.len();
            if ids.is_empty() {
                self.map.remove(&hash);
            }
        }
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes used by the hash buckets, charged as traversal work when a
    /// cycle starts.
    pub fn bucket_bytes(&self) -> usize {
        self.map.capacity() * std::mem::size_of::<usize>()
    }
}
