// Sweep phase: walk the object lists freeing dead objects and repainting
// survivors with the current white.

use crate::gc::{GC, GCSWEEPCOST, GcBody, GcId, GcList, GcState};
use crate::lua_value::Upvalue;

/// Position of an incremental sweep inside one object list.
///
/// `prev` is the last object already examined (`None` for the list head).
/// Code that moves an object out of a list being swept fixes `prev` up
/// first so the cursor never refers to an object in another list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCursor {
    pub(crate) list: GcList,
    pub(crate) prev: Option<GcId>,
}

impl SweepCursor {
    pub(crate) fn head(list: GcList) -> Self {
        SweepCursor { list, prev: None }
    }

    pub fn list(&self) -> GcList {
        self.list
    }
}

impl GC {
    /// sweeplist: examine up to `count` objects after the cursor. Returns
    /// `None` when the end of the list was reached.
    pub(crate) fn sweep_list(
        &mut self,
        mut cursor: SweepCursor,
        mut count: usize,
    ) -> Option<SweepCursor> {
        let current = self.current_white;
        while count > 0 {
            let id = self.pool.after(cursor.list, cursor.prev)?;
            let dead = match self.pool.get_mut(id) {
                Some(obj) if obj.header.is_dead(current) => true,
                Some(obj) => {
                    obj.header.make_white(current);
                    false
                }
                None => return None,
            };
            if dead {
                self.pool.unlink_after(cursor.list, cursor.prev);
                self.free_object(id);
            } else {
                cursor.prev = Some(id);
            }
            self.stats.objects_swept += 1;
            count -= 1;
        }
        self.pool.after(cursor.list, cursor.prev)?;
        Some(cursor)
    }

    /// sweepstep: one bounded slice of the sweep in the current list, moving
    /// on to `next_state` once it is exhausted.
    pub(crate) fn sweep_step(&mut self, next_state: GcState, next_list: Option<GcList>) -> isize {
        if let Some(cursor) = self.sweep_cursor {
            let olddebt = self.gc_debt;
            let sweep_max = self.option.sweep_max();
            self.sweep_cursor = self.sweep_list(cursor, sweep_max);
            // freed memory no longer counts as live
            self.gc_estimate += self.gc_debt - olddebt;
            if self.sweep_cursor.is_some() {
                return sweep_max as isize * GCSWEEPCOST;
            }
        }
        self.gc_state = next_state;
        self.sweep_cursor = next_list.map(SweepCursor::head);
        0
    }

    /// entersweep: start sweeping `allgc`. The first object is examined right
    /// away so the cursor never sits before a freshly created object.
    pub(crate) fn enter_sweep(&mut self) {
        self.gc_state = GcState::SwpAllGc;
        self.sweep_cursor = self.sweep_list(SweepCursor::head(GcList::AllGc), 1);
    }

    /// Release an object that is already unlinked from its list.
    pub(crate) fn free_object(&mut self, id: GcId) {
        let Some(obj) = self.pool.free(id) else {
            return;
        };
        let size = obj.header.size() as usize;
        match &obj.body {
            GcBody::String(s) => self.strings.remove(s.hash(), id),
            GcBody::Thread(th) => {
                // luaF_close on the whole stack
                for &uv in &th.open_upvalues {
                    if let Some(upvalue) = self.pool.get_mut(uv).and_then(|o| o.as_upvalue_mut()) {
                        if let Upvalue::Open { level, .. } = *upvalue {
                            *upvalue = Upvalue::Closed(th.slot(level));
                        }
                    }
                }
                self.twups.retain(|&t| t != id);
            }
            _ => {}
        }
        let released = self.allocator.realloc(size, 0);
        debug_assert!(released.is_ok(), "freeing memory cannot fail");
        self.gc_debt -= size as isize;
        self.stats.bytes_freed += size;
        self.stats.objects_freed += 1;
        tracing::trace!(%id, kind = obj.kind().name(), size, "free");
    }

    /// Free every object of `list` regardless of color.
    pub(crate) fn free_list(&mut self, list: GcList) {
        while let Some(id) = self.pool.unlink_after(list, None) {
            self.free_object(id);
        }
    }
}
