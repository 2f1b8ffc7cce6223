// Lua GC
// Incremental tri-color mark & sweep collector for a Lua 5.3 style runtime

#[cfg(test)]
mod test;

pub mod gc;
pub mod lua_value;
pub mod lua_vm;

pub use gc::*;
pub use lua_value::{LuaFunction, LuaProto, LuaTable, LuaThread, LuaUserdata, LuaValue};
pub use lua_vm::{LuaCallHook, LuaError, LuaResult, LuaVM};
