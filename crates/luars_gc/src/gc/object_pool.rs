// Arena storage for collectable objects
//
// - Objects live in `Vec<Option<GcObject>>`, addressed by `GcId`
// - `None` is a free slot, reused through the free list
// - Ids never move, so cycles are just ids pointing at each other
use std::ops::{Index, IndexMut};

use super::GcId;
use super::gc_object::GcObject;

#[derive(Default)]
pub struct GcPool {
    storage: Vec<Option<GcObject>>,
    free_list: Vec<u32>,
    count: usize,
}

impl GcPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its id
    #[inline]
    pub fn alloc(&mut self, object: GcObject) -> GcId {
        self.count += 1;
        if let Some(free_id) = self.free_list.pop() {
            self.storage[free_id as usize] = Some(object);
            GcId(free_id)
        } else {
            let id = self.storage.len() as u32;
            self.storage.push(Some(object));
            GcId(id)
        }
    }

    #[inline(always)]
    pub fn get(&self, id: GcId) -> Option<&GcObject> {
        self.storage.get(id.index()).and_then(|slot| slot.as_ref())
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: GcId) -> Option<&mut GcObject> {
        self.storage.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    /// Release a slot, handing the object back to the caller for destruction
    #[inline]
    pub fn free(&mut self, id: GcId) -> Option<GcObject> {
        let object = self.storage.get_mut(id.index())?.take()?;
        self.free_list.push(id.0);
        self.count -= 1;
        Some(object)
    }

    #[inline(always)]
    pub fn contains(&self, id: GcId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live objects
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcId, &GcObject)> {
        self.storage
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|o| (GcId(i as u32), o)))
    }

    pub fn shrink_to_fit(&mut self) {
        while matches!(self.storage.last(), Some(None)) {
            self.storage.pop();
        }
        let len = self.storage.len() as u32;
        self.free_list.retain(|&id| id < len);
        self.storage.shrink_to_fit();
        self.free_list.shrink_to_fit();
    }
}

impl Index<GcId> for GcPool {
    type Output = GcObject;

    #[inline(always)]
    fn index(&self, id: GcId) -> &GcObject {
        match self.get(id) {
            Some(o) => o,
            None => panic!("dangling object handle {id:?}"),
        }
    }
}

impl IndexMut<GcId> for GcPool {
    #[inline(always)]
    fn index_mut(&mut self, id: GcId) -> &mut GcObject {
        match self.get_mut(id) {
            Some(o) => o,
            None => panic!("dangling object handle {id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::gc_object::{GcBody, GcHeader};
    use crate::lua_value::LuaTable;

    fn table_object() -> GcObject {
        GcObject {
            header: GcHeader::with_white(0, 0),
            next: None,
            body: GcBody::Table(LuaTable::new(0, 0)),
        }
    }

    #[test]
    fn test_free_slot_is_reused() {
        let mut pool = GcPool::new();
        let a = pool.alloc(table_object());
        let b = pool.alloc(table_object());
        assert_eq!(pool.len(), 2);

        assert!(pool.free(a).is_some());
        assert!(!pool.contains(a));
        assert!(pool.free(a).is_none());

        let c = pool.alloc(table_object());
        assert_eq!(c, a);
        assert!(pool.contains(b));
        assert_eq!(pool.iter().count(), 2);
    }

    #[test]
    fn test_shrink_drops_trailing_free_slots() {
        let mut pool = GcPool::new();
        let a = pool.alloc(table_object());
        let b = pool.alloc(table_object());
        pool.free(b);
        pool.shrink_to_fit();
        assert_eq!(pool.alloc(table_object()), b);
        assert!(pool.contains(a));
    }
}
