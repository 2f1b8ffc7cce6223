use crate::gc::GcId;
use crate::lua_value::LuaValue;

const PROTO_HEADER_SIZE: usize = 120;

/// Function prototype: the static part of a Lua function.
///
/// Only the fields the collector traverses are modelled. `cache` holds the
/// last closure created from this prototype and is a weak reference.
#[derive(Debug, Clone, Default)]
pub struct LuaProto {
    pub source: Option<GcId>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<GcId>,
    pub upvalue_names: Vec<Option<GcId>>,
    pub local_names: Vec<Option<GcId>>,
    pub(crate) cache: Option<GcId>,
}

impl LuaProto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> Option<GcId> {
        self.cache
    }

    pub(crate) fn estimated_size(&self) -> usize {
        PROTO_HEADER_SIZE
            + 16 * self.constants.len()
            + 8 * (self.protos.len() + self.upvalue_names.len() + self.local_names.len())
    }
}
