// Object allocation
//
// - All memory accounting goes through an `Allocator`, which may refuse a
//   request. The runtime reacts to a refusal with an emergency collection.
// - New objects are born with the current white at the head of `allgc`.
// - All strings are interned: equal content means the same object.

use std::fmt;

use crate::gc::{GC, GcBody, GcHeader, GcId, GcObject};
use crate::lua_value::LuaString;

/// The allocator could not satisfy a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    pub requested: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot allocate {} bytes", self.requested)
    }
}

impl std::error::Error for AllocError {}

/// lua_Alloc: resize a block from `old_size` to `new_size` bytes. A
/// `new_size` of zero frees the block and must not fail.
pub trait Allocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> Result<(), AllocError>;

    /// Bytes currently handed out
    fn in_use(&self) -> usize;
}

/// Allocator with a hard byte budget
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    limit: usize,
    in_use: usize,
}

impl BudgetAllocator {
    pub fn new(limit: usize) -> Self {
        BudgetAllocator { limit, in_use: 0 }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }
}

impl Allocator for BudgetAllocator {
    fn realloc(&mut self, old_size: usize, new_size: usize) -> Result<(), AllocError> {
        let base = self.in_use.saturating_sub(old_size);
        if new_size > old_size && base.saturating_add(new_size) > self.limit {
            return Err(AllocError {
                requested: new_size,
            });
        }
        self.in_use = base + new_size;
        Ok(())
    }

    fn in_use(&self) -> usize {
        self.in_use
    }
}

impl GC {
    /// Ask the allocator for a resize and charge the difference to the debt.
    pub(crate) fn try_realloc(&mut self, old_size: usize, new_size: usize) -> Result<(), AllocError> {
        self.allocator.realloc(old_size, new_size)?;
        let delta = new_size as isize - old_size as isize;
        self.gc_debt += delta;
        if delta > 0 {
            self.stats.bytes_allocated += delta as usize;
        } else {
            self.stats.bytes_freed += (-delta) as usize;
        }
        Ok(())
    }

    /// Re-account an object whose payload shrank to `new_size` bytes.
    pub(crate) fn release_bytes(&mut self, id: GcId, new_size: usize) {
        let Some(obj) = self.pool.get_mut(id) else {
            return;
        };
        let old_size = obj.header.size() as usize;
        if new_size >= old_size {
            return;
        }
        obj.header.set_size(new_size as u32);
        let released = self.try_realloc(old_size, new_size);
        debug_assert!(released.is_ok(), "shrinking cannot fail");
    }

    /// luaC_newobj: link an already paid-for object into `allgc`.
    pub(crate) fn link_new_object(&mut self, body: GcBody, size: usize) -> GcId {
        let header = GcHeader::with_white(self.current_white, size as u32);
        let kind = body.kind();
        let id = self.pool.alloc(GcObject::new(header, body));
        self.stats.objects_allocated += 1;
        tracing::trace!(%id, kind = kind.name(), size, "new object");
        id
    }

    /// Look up an interned string. A string that is dead but not yet swept
    /// is brought back to life instead of being duplicated.
    pub(crate) fn find_interned(&mut self, hash: u64, s: &str) -> Option<GcId> {
        let id = self.strings.find(&self.pool, hash, s)?;
        let current = self.current_white;
        if let Some(obj) = self.pool.get_mut(id) {
            if obj.header.is_dead(current) {
                obj.header.change_white();
            }
        }
        Some(id)
    }

    /// Link a paid-for string and register it in the string table.
    pub(crate) fn link_new_string(&mut self, string: LuaString, size: usize) -> GcId {
        let hash = string.hash();
        let id = self.link_new_object(GcBody::String(string), size);
        self.strings.insert(hash, id);
        id
    }
}
