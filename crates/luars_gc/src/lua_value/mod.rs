// Value model traced by the collector.
// Every collectable payload lives in the GC pool; values refer to it by GcId.
mod lua_function;
mod lua_proto;
mod lua_string;
mod lua_table;
mod lua_thread;
mod lua_userdata;
#[allow(clippy::module_inception)]
mod lua_value;

pub use lua_function::{LuaFunction, Upvalue};
pub(crate) use lua_function::UPVALUE_SIZE;
pub use lua_proto::LuaProto;
pub use lua_string::LuaString;
pub(crate) use lua_string::STRING_HEADER_SIZE;
pub use lua_table::LuaTable;
pub use lua_thread::{BASIC_STACK_SIZE, LuaThread};
pub use lua_userdata::LuaUserdata;
pub use lua_value::{CFunction, LUA_NUMTAGS, LuaValue, LuaValueKind};
