use crate::gc::GcId;
use crate::lua_value::LuaValue;

const USERDATA_HEADER_SIZE: usize = 40;

/// Full userdata: an opaque byte block with a metatable and one user value.
#[derive(Debug, Clone, Default)]
pub struct LuaUserdata {
    pub(crate) data: Vec<u8>,
    pub(crate) metatable: Option<GcId>,
    pub(crate) user_value: LuaValue,
}

impl LuaUserdata {
    pub fn new(data: Vec<u8>) -> Self {
        LuaUserdata {
            data,
            metatable: None,
            user_value: LuaValue::Nil,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn metatable(&self) -> Option<GcId> {
        self.metatable
    }

    pub fn user_value(&self) -> LuaValue {
        self.user_value
    }

    pub(crate) fn estimated_size(&self) -> usize {
        USERDATA_HEADER_SIZE + self.data.len()
    }
}
