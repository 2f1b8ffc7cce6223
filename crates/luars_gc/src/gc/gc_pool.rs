use crate::gc::{GcId, GcObject};

/// The primary object list an object belongs to.
///
/// Every live object is linked into exactly one of these through its
/// `next` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcList {
    /// allgc: ordinary collectable objects
    AllGc = 0,
    /// finobj: objects with a `__gc` metamethod
    FinObj = 1,
    /// tobefnz: unreachable objects waiting for their finalizer
    ToBeFnz = 2,
    /// fixedgc: objects that are never collected
    Fixed = 3,
}

const LIST_COUNT: usize = 4;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<GcObject>,
}

/// Arena of collectable objects plus the intrusive object lists.
///
/// Slots are reused through a free list; a slot's generation changes every
/// time it is freed so stale handles stop resolving.
#[derive(Debug, Default)]
pub struct GcPool {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    heads: [Option<GcId>; LIST_COUNT],
    tails: [Option<GcId>; LIST_COUNT],
    lens: [usize; LIST_COUNT],
}

impl GcPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new object and link it at the head of `allgc`.
    pub fn alloc(&mut self, object: GcObject) -> GcId {
        let id = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            GcId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                object: Some(object),
            });
            GcId::new(index, 0)
        };
        self.push_front(GcList::AllGc, id);
        id
    }

    #[inline]
    pub fn get(&self, id: GcId) -> Option<&GcObject> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation == id.generation() {
            slot.object.as_ref()
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: GcId) -> Option<&mut GcObject> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation == id.generation() {
            slot.object.as_mut()
        } else {
            None
        }
    }

    #[inline]
    pub fn contains(&self, id: GcId) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub fn head(&self, list: GcList) -> Option<GcId> {
        self.heads[list as usize]
    }

    #[inline]
    pub fn len(&self, list: GcList) -> usize {
        self.lens[list as usize]
    }

    /// Number of live objects over all lists
    pub fn total_len(&self) -> usize {
        self.lens.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    #[inline]
    pub fn next_of(&self, id: GcId) -> Option<GcId> {
        self.get(id).and_then(|o| o.next)
    }

    /// Successor of a list position; `None` stands for the list head.
    #[inline]
    pub fn after(&self, list: GcList, prev: Option<GcId>) -> Option<GcId> {
        match prev {
            None => self.head(list),
            Some(p) => self.next_of(p),
        }
    }

    /// Link an unlinked object at the head of `list`.
    pub fn push_front(&mut self, list: GcList, id: GcId) {
        let head = self.heads[list as usize];
        if let Some(obj) = self.get_mut(id) {
            obj.next = head;
            obj.list = list;
        } else {
            return;
        }
        self.heads[list as usize] = Some(id);
        if head.is_none() {
            self.tails[list as usize] = Some(id);
        }
        self.lens[list as usize] += 1;
    }

    /// Link an unlinked object at the tail of `list`.
    pub fn push_back(&mut self, list: GcList, id: GcId) {
        let tail = self.tails[list as usize];
        if let Some(obj) = self.get_mut(id) {
            obj.next = None;
            obj.list = list;
        } else {
            return;
        }
        match tail {
            Some(t) => {
                if let Some(obj) = self.get_mut(t) {
                    obj.next = Some(id);
                }
            }
            None => self.heads[list as usize] = Some(id),
        }
        self.tails[list as usize] = Some(id);
        self.lens[list as usize] += 1;
    }

    /// Unlink the successor of `prev` (the head when `prev` is `None`).
    pub fn unlink_after(&mut self, list: GcList, prev: Option<GcId>) -> Option<GcId> {
        let id = self.after(list, prev)?;
        let next = self.get_mut(id).and_then(|o| o.next.take());
        match prev {
            None => self.heads[list as usize] = next,
            Some(p) => {
                if let Some(obj) = self.get_mut(p) {
                    obj.next = next;
                }
            }
        }
        if next.is_none() {
            self.tails[list as usize] = prev;
        }
        self.lens[list as usize] -= 1;
        Some(id)
    }

    /// Find the predecessor of `id` in its list. The outer `None` means the
    /// object is not linked; the inner one means it is the head.
    pub fn predecessor(&self, id: GcId) -> Option<Option<GcId>> {
        let list = self.get(id)?.list;
        let mut prev = None;
        let mut cur = self.head(list);
        while let Some(c) = cur {
            if c == id {
                return Some(prev);
            }
            prev = Some(c);
            cur = self.next_of(c);
        }
        None
    }

    /// Unlink `id` from whatever list holds it, walking from the head.
    /// Returns its former predecessor.
    pub fn unlink(&mut self, id: GcId) -> Option<Option<GcId>> {
        let list = self.get(id)?.list;
        let prev = self.predecessor(id)?;
        self.unlink_after(list, prev);
        Some(prev)
    }

    /// Release an object that has already been unlinked.
    pub fn free(&mut self, id: GcId) -> Option<GcObject> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index());
        Some(object)
    }

    pub fn iter(&self, list: GcList) -> ListIter<'_> {
        ListIter {
            pool: self,
            cur: self.head(list),
        }
    }

    /// Ids of every live object, in slot order
    pub fn ids(&self) -> impl Iterator<Item = GcId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.object
                .as_ref()
                .map(|_| GcId::new(index as u32, slot.generation))
        })
    }

    /// Release spare capacity. Empty slots are kept so their generation
    /// keeps invalidating handles to the objects they held.
    pub fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
        self.free_list.shrink_to_fit();
    }
}

/// Iterator over one object list
pub struct ListIter<'a> {
    pool: &'a GcPool,
    cur: Option<GcId>,
}

impl Iterator for ListIter<'_> {
    type Item = GcId;

    fn next(&mut self) -> Option<GcId> {
        let id = self.cur?;
        self.cur = self.pool.next_of(id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{GcBody, GcHeader, WhiteShade};
    use crate::lua_value::LuaTable;

    fn table() -> GcObject {
        GcObject::new(
            GcHeader::with_white(WhiteShade::A, 64),
            GcBody::Table(LuaTable::new(0)),
        )
    }

    #[test]
    fn test_alloc_links_at_head() {
        let mut pool = GcPool::new();
        let a = pool.alloc(table());
        let b = pool.alloc(table());
        let c = pool.alloc(table());
        assert_eq!(pool.iter(GcList::AllGc).collect::<Vec<_>>(), vec![c, b, a]);
        assert_eq!(pool.len(GcList::AllGc), 3);
    }

    #[test]
    fn test_move_between_lists() {
        let mut pool = GcPool::new();
        let a = pool.alloc(table());
        let b = pool.alloc(table());
        let c = pool.alloc(table());

        assert_eq!(pool.unlink(b), Some(Some(c)));
        pool.push_back(GcList::ToBeFnz, b);
        assert_eq!(pool.unlink(a), Some(Some(c)));
        pool.push_back(GcList::ToBeFnz, a);

        assert_eq!(pool.iter(GcList::AllGc).collect::<Vec<_>>(), vec![c]);
        assert_eq!(pool.iter(GcList::ToBeFnz).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(pool.get(a).map(|o| o.list()), Some(GcList::ToBeFnz));

        // tail is kept up to date after removing the last element
        assert_eq!(pool.unlink_after(GcList::ToBeFnz, Some(b)), Some(a));
        pool.push_back(GcList::ToBeFnz, a);
        assert_eq!(pool.iter(GcList::ToBeFnz).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(pool.total_len(), 3);
    }

    #[test]
    fn test_stale_handle_after_free() {
        let mut pool = GcPool::new();
        let a = pool.alloc(table());
        pool.unlink(a);
        assert!(pool.free(a).is_some());
        assert!(pool.get(a).is_none());

        let b = pool.alloc(table());
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(pool.get(a).is_none());
        assert!(pool.free(a).is_none());
        assert!(pool.get(b).is_some());
    }

    #[test]
    fn test_shrink_keeps_trailing_generations() {
        let mut pool = GcPool::new();
        let _a = pool.alloc(table());
        let b = pool.alloc(table());
        pool.unlink(b);
        assert!(pool.free(b).is_some());
        pool.shrink_to_fit();

        let c = pool.alloc(table());
        assert_eq!(b.index(), c.index());
        assert_ne!(b.generation(), c.generation());
        assert!(pool.get(b).is_none());
        assert!(pool.get(c).is_some());
    }
}
