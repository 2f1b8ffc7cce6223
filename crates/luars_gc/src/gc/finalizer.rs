// Finalizer bookkeeping: objects with `__gc` live in `finobj` until they
// become unreachable, then wait in `tobefnz` for the runtime to call them.

use crate::gc::{GC, GcId, GcList, GcObjectKind, SweepCursor};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};

impl GC {
    /// Does metatable `mt` define a `__gc` field?
    pub(crate) fn has_finalizer(&self, mt: Option<GcId>) -> bool {
        self.gc_metamethod(mt).is_some_and(|v| !v.is_nil())
    }

    /// The `__gc` field of metatable `mt`
    pub(crate) fn gc_metamethod(&self, mt: Option<GcId>) -> Option<LuaValue> {
        let (mt, tm_gc) = (mt?, self.tm_gc?);
        self.pool
            .get(mt)
            .and_then(|o| o.as_table())
            .and_then(|t| t.raw_get(&LuaValue::String(tm_gc)))
    }

    /// luaC_checkfinalizer: called after `mt` became the metatable of `id`.
    /// Objects whose metatable has `__gc` at this moment move to `finobj`.
    pub(crate) fn check_finalizer(&mut self, id: GcId, mt: Option<GcId>) -> LuaResult<()> {
        let current = self.current_white;
        let Some(obj) = self.pool.get(id) else {
            return Err(LuaError::DeadObject);
        };
        if obj.header.is_dead(current) {
            return Err(LuaError::DeadObject);
        }
        if self.closing
            || obj.header.to_finalize()
            || obj.list() != GcList::AllGc
            || !self.has_finalizer(mt)
        {
            return Ok(());
        }
        if self.gc_state.is_sweep_phase() {
            // the sweep cursor must not skip or revisit the object
            if let Some(obj) = self.pool.get_mut(id) {
                obj.header.make_white(current);
            }
            if let Some(cursor) = self.sweep_cursor.as_mut() {
                if cursor.list == GcList::AllGc && cursor.prev == Some(id) {
                    cursor.prev = self.pool.predecessor(id).flatten();
                }
            }
        }
        self.pool.unlink(id);
        self.pool.push_front(GcList::FinObj, id);
        if let Some(obj) = self.pool.get_mut(id) {
            obj.header.set_finalize(true);
        }
        tracing::trace!(%id, "object marked for finalization");
        Ok(())
    }

    /// separatetobefnz: move unreachable objects (every object when `all`)
    /// from `finobj` to the end of `tobefnz`, keeping their order.
    pub(crate) fn separate_tobefnz(&mut self, all: bool) {
        let mut prev = None;
        let mut moved = 0usize;
        while let Some(id) = self.pool.after(GcList::FinObj, prev) {
            let white = self.is_white(id);
            if white || all {
                self.pool.unlink_after(GcList::FinObj, prev);
                self.pool.push_back(GcList::ToBeFnz, id);
                moved += 1;
            } else {
                prev = Some(id);
            }
        }
        if moved > 0 {
            tracing::debug!(moved, all, "objects separated for finalization");
        }
    }

    /// udata2finalize: take the first object waiting for its finalizer and
    /// put it back among the ordinary objects.
    pub(crate) fn udata_to_finalize(&mut self) -> Option<GcId> {
        let id = self.pool.head(GcList::ToBeFnz)?;
        if let Some(cursor) = self.sweep_cursor.as_mut() {
            if cursor.list == GcList::ToBeFnz && cursor.prev == Some(id) {
                *cursor = SweepCursor::head(GcList::ToBeFnz);
            }
        }
        self.pool.unlink_after(GcList::ToBeFnz, None);
        self.pool.push_front(GcList::AllGc, id);
        let sweeping = self.gc_state.is_sweep_phase();
        let current = self.current_white;
        if let Some(obj) = self.pool.get_mut(id) {
            obj.header.set_finalize(false);
            if sweeping {
                // the sweep has already passed the head of allgc
                obj.header.make_white(current);
            }
        }
        Some(id)
    }

    /// luaC_fix: make a string permanent. It is kept gray so barriers never
    /// see it as black.
    pub fn fix_object(&mut self, id: GcId) -> LuaResult<()> {
        let Some(obj) = self.pool.get(id) else {
            return Err(LuaError::DeadObject);
        };
        if obj.kind() != GcObjectKind::String {
            return Err(LuaError::RuntimeError);
        }
        if obj.list() == GcList::Fixed {
            return Ok(());
        }
        if obj.list() != GcList::AllGc {
            return Err(LuaError::RuntimeError);
        }
        if let Some(cursor) = self.sweep_cursor.as_mut() {
            if cursor.list == GcList::AllGc && cursor.prev == Some(id) {
                cursor.prev = self.pool.predecessor(id).flatten();
            }
        }
        self.pool.unlink(id);
        self.pool.push_front(GcList::Fixed, id);
        if let Some(obj) = self.pool.get_mut(id) {
            obj.header.make_gray();
        }
        Ok(())
    }
}
