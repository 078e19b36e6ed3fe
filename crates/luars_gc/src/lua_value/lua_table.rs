// Lua table following the Lua 5.4 layout
// - Array part for integer keys [1..n]
// - Hash part for everything else, insertion ordered so traversal can run
//   in both directions
use ahash::RandomState;
use indexmap::IndexMap;

use super::LuaValue;
use crate::gc::GcId;

/// Approximate footprint of one hash node (key, value and hash slot)
const NODE_SIZE: usize = 2 * std::mem::size_of::<LuaValue>() + std::mem::size_of::<u64>();

pub struct LuaTable {
    /// Array part: values for integer keys [1..array.len()], may contain holes
    pub(crate) array: Vec<LuaValue>,

    /// Hash part
    pub(crate) hash: IndexMap<LuaValue, LuaValue, RandomState>,

    metatable: Option<GcId>,
}

impl LuaTable {
    pub fn new(array_size: usize, hash_size: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(array_size),
            hash: IndexMap::with_capacity_and_hasher(hash_size, RandomState::new()),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<GcId> {
        self.metatable
    }

    pub(crate) fn set_metatable(&mut self, mt: Option<GcId>) {
        self.metatable = mt;
    }

    /// Fast integer key access for the array part
    #[inline(always)]
    pub fn get_int(&self, key: i64) -> LuaValue {
        if key > 0 && (key as usize) <= self.array.len() {
            return self.array[key as usize - 1];
        }
        self.hash.get(&LuaValue::Integer(key)).copied().unwrap_or_default()
    }

    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        match key.normalize_key() {
            LuaValue::Integer(i) => self.get_int(i),
            k => self.hash.get(&k).copied().unwrap_or_default(),
        }
    }

    /// Raw assignment. The caller rejects nil and NaN keys; a nil value
    /// removes the entry.
    pub(crate) fn raw_set(&mut self, key: LuaValue, value: LuaValue) {
        let key = key.normalize_key();
        if let LuaValue::Integer(i) = key {
            let len = self.array.len();
            if i > 0 && (i as usize) <= len {
                self.array[i as usize - 1] = value;
                return;
            }
            if i > 0 && i as usize == len + 1 && !value.is_nil() {
                self.hash.swap_remove(&key);
                self.array.push(value);
                self.migrate_to_array();
                return;
            }
        }
        if value.is_nil() {
            self.hash.swap_remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    /// Move keys that now continue the array part out of the hash part.
    fn migrate_to_array(&mut self) {
        loop {
            let next = LuaValue::Integer(self.array.len() as i64 + 1);
            match self.hash.swap_remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// Border of the array part (trailing nils excluded)
    pub fn len(&self) -> usize {
        let mut n = self.array.len();
        while n > 0 && self.array[n - 1].is_nil() {
            n -= 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.hash.is_empty()
    }

    /// Number of non-nil entries in both parts
    pub fn entry_count(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count() + self.hash.len()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaTable>()
            + self.array.capacity() * std::mem::size_of::<LuaValue>()
            + self.hash.capacity() * NODE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_part_grows_and_migrates() {
        let mut t = LuaTable::new(0, 0);
        t.raw_set(LuaValue::Integer(2), LuaValue::Integer(20));
        assert_eq!(t.hash_len(), 1);
        t.raw_set(LuaValue::Integer(1), LuaValue::Integer(10));
        assert_eq!(t.hash_len(), 0);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get_int(2), LuaValue::Integer(20));
    }

    #[test]
    fn test_float_keys_normalize() {
        let mut t = LuaTable::new(0, 0);
        t.raw_set(LuaValue::Float(1.0), LuaValue::Boolean(true));
        assert_eq!(t.raw_get(&LuaValue::Integer(1)), LuaValue::Boolean(true));
        t.raw_set(LuaValue::Float(1.5), LuaValue::Integer(7));
        assert_eq!(t.raw_get(&LuaValue::Float(1.5)), LuaValue::Integer(7));
    }

    #[test]
    fn test_nil_value_removes_hash_entry() {
        let mut t = LuaTable::new(0, 0);
        t.raw_set(LuaValue::Boolean(true), LuaValue::Integer(1));
        t.raw_set(LuaValue::Boolean(true), LuaValue::Nil);
        assert!(t.is_empty());
    }

    #[test]
    fn test_removal_keeps_other_entries() {
        let mut t = LuaTable::new(0, 0);
        for i in 10..20 {
            t.raw_set(LuaValue::Integer(i), LuaValue::Integer(i * 2));
        }
        t.raw_set(LuaValue::Integer(12), LuaValue::Nil);
        t.raw_set(LuaValue::Integer(10), LuaValue::Nil);
        assert_eq!(t.hash_len(), 8);
        assert_eq!(t.raw_get(&LuaValue::Integer(12)), LuaValue::Nil);
        for i in [11, 13, 14, 15, 16, 17, 18, 19] {
            assert_eq!(t.raw_get(&LuaValue::Integer(i)), LuaValue::Integer(i * 2));
        }
    }
}
