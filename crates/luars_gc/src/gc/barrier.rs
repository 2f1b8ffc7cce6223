// Write barriers. While marking, every store that could create a black->white
// edge goes through one of these. Outside the marking phases they do nothing:
// the sweep repaints survivors anyway.

use crate::gc::{GC, GcId};
use crate::lua_value::{LuaValue, Upvalue};

impl GC {
    /// luaC_barrier_: forward barrier, marks the white target of a black
    /// object.
    #[inline]
    pub fn barrier_forward(&mut self, object: GcId, target: GcId) {
        if !self.keep_invariant() {
            return;
        }
        if self.is_black(object) && self.is_white(target) {
            self.mark_object(target);
        }
    }

    /// Object barrier for a value about to be stored in `object`.
    #[inline]
    pub fn barrier_value(&mut self, object: GcId, value: &LuaValue) {
        if let Some(target) = value.as_gc_id() {
            self.barrier_forward(object, target);
        }
    }

    /// luaC_barrierback_: the container goes back to gray and is traversed
    /// again in the atomic phase. Used for tables, where forward barriers
    /// would fire on every store.
    #[inline]
    pub fn barrier_back(&mut self, object: GcId) {
        if !self.keep_invariant() {
            return;
        }
        if let Some(obj) = self.pool.get_mut(object) {
            if obj.header.is_black() {
                obj.header.make_gray();
                self.grayagain.push(object);
            }
        }
    }

    /// luaC_upvalbarrier: a closed upvalue that is not white must not point
    /// to a white value.
    pub fn barrier_upvalue(&mut self, upvalue: GcId) {
        if !self.keep_invariant() {
            return;
        }
        let Some(obj) = self.pool.get(upvalue) else {
            return;
        };
        if obj.header.is_white() {
            return;
        }
        if let Some(Upvalue::Closed(value)) = obj.as_upvalue().copied() {
            if value.as_gc_id().is_some_and(|id| self.is_white(id)) {
                self.mark_value(&value);
            }
        }
    }
}
