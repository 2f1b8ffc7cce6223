use ahash::RandomState;
use indexmap::IndexMap;

use crate::gc::GcId;
use crate::lua_value::LuaValue;

const TABLE_HEADER_SIZE: usize = 56;
/// sizeof(Node): key + value + chain link
const NODE_SIZE: usize = 32;

/// Hash table with an optional metatable.
///
/// Keys are normalized by the caller (see [`LuaValue::normalize_key`]);
/// assigning nil removes the entry.
#[derive(Debug, Clone, Default)]
pub struct LuaTable {
    pub(crate) hash: IndexMap<LuaValue, LuaValue, RandomState>,
    pub(crate) metatable: Option<GcId>,
}

impl LuaTable {
    pub fn new(capacity: usize) -> Self {
        LuaTable {
            hash: IndexMap::with_capacity_and_hasher(capacity, RandomState::new()),
            metatable: None,
        }
    }

    #[inline]
    pub fn raw_get(&self, key: &LuaValue) -> Option<LuaValue> {
        self.hash.get(key).copied()
    }

    /// Returns the previous value, if any.
    pub fn raw_set(&mut self, key: LuaValue, value: LuaValue) -> Option<LuaValue> {
        if value.is_nil() {
            self.hash.swap_remove(&key)
        } else {
            self.hash.insert(key, value)
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hash.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hash.is_empty()
    }

    #[inline]
    pub fn metatable(&self) -> Option<GcId> {
        self.metatable
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LuaValue, &LuaValue)> {
        self.hash.iter()
    }

    /// Node storage is charged by capacity, like a Lua node array that is
    /// only resized on rehash.
    pub(crate) fn estimated_size(&self) -> usize {
        TABLE_HEADER_SIZE + NODE_SIZE * self.hash.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_nil_removes() {
        let mut t = LuaTable::new(0);
        t.raw_set(LuaValue::integer(1), LuaValue::boolean(true));
        assert_eq!(t.len(), 1);
        assert_eq!(
            t.raw_set(LuaValue::integer(1), LuaValue::nil()),
            Some(LuaValue::boolean(true))
        );
        assert!(t.is_empty());
        assert_eq!(t.raw_get(&LuaValue::integer(1)), None);
    }

    #[test]
    fn test_size_grows_with_capacity() {
        let mut t = LuaTable::new(0);
        let empty = t.estimated_size();
        for i in 0..16 {
            t.raw_set(LuaValue::integer(i), LuaValue::integer(i));
        }
        assert!(t.estimated_size() > empty);
        let grown = t.estimated_size();
        for i in 0..16 {
            t.raw_set(LuaValue::integer(i), LuaValue::nil());
        }
        assert_eq!(t.estimated_size(), grown);
    }
}
