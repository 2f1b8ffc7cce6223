use crate::gc::GcId;
use crate::lua_value::{CFunction, LuaValue};

const CLOSURE_HEADER_SIZE: usize = 32;

/// A closure: either a Lua function (prototype + upvalue cells) or a native
/// function with captured values.
#[derive(Debug, Clone)]
pub enum LuaFunction {
    Lua {
        proto: GcId,
        upvalues: Vec<GcId>,
    },
    C {
        func: CFunction,
        upvalues: Vec<LuaValue>,
    },
}

impl LuaFunction {
    pub fn is_lua(&self) -> bool {
        matches!(self, LuaFunction::Lua { .. })
    }

    pub fn upvalue_count(&self) -> usize {
        match self {
            LuaFunction::Lua { upvalues, .. } => upvalues.len(),
            LuaFunction::C { upvalues, .. } => upvalues.len(),
        }
    }

    pub(crate) fn estimated_size(&self) -> usize {
        match self {
            LuaFunction::Lua { upvalues, .. } => CLOSURE_HEADER_SIZE + 8 * upvalues.len(),
            LuaFunction::C { upvalues, .. } => CLOSURE_HEADER_SIZE + 16 * upvalues.len(),
        }
    }
}

/// A closed-over variable cell.
///
/// While open it aliases a stack slot of `thread`; closing copies the slot
/// into the cell.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { thread: GcId, level: usize },
    Closed(LuaValue),
}

pub(crate) const UPVALUE_SIZE: usize = 40;

impl Upvalue {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    #[inline]
    pub fn closed_value(&self) -> Option<LuaValue> {
        match self {
            Upvalue::Closed(v) => Some(*v),
            Upvalue::Open { .. } => None,
        }
    }

    #[inline]
    pub fn stack_level(&self) -> Option<usize> {
        match self {
            Upvalue::Open { level, .. } => Some(*level),
            Upvalue::Closed(_) => None,
        }
    }
}
