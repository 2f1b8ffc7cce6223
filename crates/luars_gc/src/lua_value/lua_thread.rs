use crate::gc::GcId;
use crate::lua_value::LuaValue;

/// BASIC_STACK_SIZE (2 * LUA_MINSTACK)
pub const BASIC_STACK_SIZE: usize = 40;
const THREAD_HEADER_SIZE: usize = 200;
const STACK_SLOT_SIZE: usize = 16;

/// Per-execution-context state: a value stack and the open upvalues that
/// point into it.
///
/// Slots at and above `top` are dead. They may still hold stale values
/// until the collector clears them in its final traversal.
#[derive(Debug, Clone)]
pub struct LuaThread {
    pub(crate) stack: Vec<LuaValue>,
    pub(crate) top: usize,
    /// Open upvalues, sorted by stack level (lowest first)
    pub(crate) open_upvalues: Vec<GcId>,
    /// Whether this thread is linked into the threads-with-upvalues set
    pub(crate) in_twups: bool,
}

impl Default for LuaThread {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaThread {
    pub fn new() -> Self {
        LuaThread {
            stack: vec![LuaValue::Nil; BASIC_STACK_SIZE],
            top: 0,
            open_upvalues: Vec::new(),
            in_twups: false,
        }
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Live part of the stack
    #[inline]
    pub fn live(&self) -> &[LuaValue] {
        &self.stack[..self.top]
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<LuaValue> {
        if index < self.top {
            Some(self.stack[index])
        } else {
            None
        }
    }

    pub(crate) fn push(&mut self, value: LuaValue) {
        if self.top == self.stack.len() {
            self.stack.push(value);
        } else {
            self.stack[self.top] = value;
        }
        self.top += 1;
    }

    /// Leaves the old value in the slot; the collector never reads it.
    pub(crate) fn pop(&mut self) -> Option<LuaValue> {
        if self.top == 0 {
            return None;
        }
        self.top -= 1;
        Some(self.stack[self.top])
    }

    pub(crate) fn set(&mut self, index: usize, value: LuaValue) -> bool {
        if index < self.top {
            self.stack[index] = value;
            true
        } else {
            false
        }
    }

    /// Move `top`, filling new live slots with nil.
    pub(crate) fn set_top(&mut self, top: usize) {
        if top > self.stack.len() {
            self.stack.resize(top, LuaValue::Nil);
        }
        for slot in &mut self.stack[self.top.min(top)..top] {
            *slot = LuaValue::Nil;
        }
        self.top = top;
    }

    /// Raw slot access for open upvalues, which may alias any level that
    /// was live when the upvalue was created.
    #[inline]
    pub(crate) fn slot(&self, level: usize) -> LuaValue {
        self.stack.get(level).copied().unwrap_or(LuaValue::Nil)
    }

    #[inline]
    pub(crate) fn set_slot(&mut self, level: usize, value: LuaValue) {
        if let Some(slot) = self.stack.get_mut(level) {
            *slot = value;
        }
    }

    /// Clear the dead part of the stack (traversethread, atomic pass).
    pub(crate) fn clear_dead_slots(&mut self) {
        for slot in &mut self.stack[self.top..] {
            *slot = LuaValue::Nil;
        }
    }

    /// luaD_shrinkstack: drop the unused tail when the stack is far larger
    /// than what is in use.
    pub(crate) fn shrink_stack(&mut self) {
        let good_size = (self.top + self.top / 8 + 2 * BASIC_STACK_SIZE).max(BASIC_STACK_SIZE);
        if self.stack.len() > good_size {
            self.stack.truncate(good_size);
            self.stack.shrink_to_fit();
        }
    }

    pub fn has_open_upvalues(&self) -> bool {
        !self.open_upvalues.is_empty()
    }

    /// Undo a stack growth that could not be paid for.
    pub(crate) fn rollback_growth(&mut self, len: usize, top: usize) {
        self.stack.truncate(len);
        self.top = top;
    }

    /// Stack slots are charged by length; growth is re-accounted after each
    /// push or `set_top` and shrinking gives the bytes back.
    pub(crate) fn estimated_size(&self) -> usize {
        THREAD_HEADER_SIZE + STACK_SLOT_SIZE * self.stack.len()
    }
}
