/// Lightweight error enum, the message lives in `LuaVM::error_message`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Runtime error - message stored in vm.error_message
    RuntimeError,
    /// Allocation failed even after an emergency collection
    OutOfMemory,
    /// A `__gc` metamethod raised an error
    GcMetamethod,
    /// The object was already collected, or is garbage waiting for the sweep
    DeadObject,
    /// nil or NaN used as a table key
    InvalidKey,
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::RuntimeError => write!(f, "Runtime Error"),
            LuaError::OutOfMemory => write!(f, "Not Enough Memory"),
            LuaError::GcMetamethod => write!(f, "Error In __gc Metamethod"),
            LuaError::DeadObject => write!(f, "Dead Object"),
            LuaError::InvalidKey => write!(f, "Invalid Table Key"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;
