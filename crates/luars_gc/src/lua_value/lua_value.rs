use std::hash::{Hash, Hasher};

use crate::gc::GcId;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

/// Native function callable from the runtime, e.g. a `__gc` finalizer.
pub type CFunction = fn(&mut LuaVM, &[LuaValue]) -> LuaResult<()>;

/// Basic type of a value, as seen by `type()`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaValueKind {
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

/// Number of basic types, size of the per-type metatable array
pub const LUA_NUMTAGS: usize = 9;

impl LuaValueKind {
    pub fn name(self) -> &'static str {
        match self {
            LuaValueKind::Nil => "nil",
            LuaValueKind::Boolean => "boolean",
            LuaValueKind::LightUserdata => "userdata",
            LuaValueKind::Number => "number",
            LuaValueKind::String => "string",
            LuaValueKind::Table => "table",
            LuaValueKind::Function => "function",
            LuaValueKind::Userdata => "userdata",
            LuaValueKind::Thread => "thread",
        }
    }
}

/// A tagged Lua value.
///
/// Collectable variants carry a [`GcId`]; the object itself lives in the
/// collector's pool, so values are plain `Copy` data.
#[derive(Debug, Clone, Copy, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    LightUserdata(usize),
    CFunction(CFunction),
    String(GcId),
    Table(GcId),
    Function(GcId),
    Userdata(GcId),
    Thread(GcId),
}

impl LuaValue {
    #[inline(always)]
    pub fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub fn integer(i: i64) -> Self {
        LuaValue::Integer(i)
    }

    #[inline(always)]
    pub fn float(n: f64) -> Self {
        LuaValue::Float(n)
    }

    #[inline(always)]
    pub fn cfunction(f: CFunction) -> Self {
        LuaValue::CFunction(f)
    }

    pub fn kind(&self) -> LuaValueKind {
        match self {
            LuaValue::Nil => LuaValueKind::Nil,
            LuaValue::Boolean(_) => LuaValueKind::Boolean,
            LuaValue::Integer(_) | LuaValue::Float(_) => LuaValueKind::Number,
            LuaValue::LightUserdata(_) => LuaValueKind::LightUserdata,
            LuaValue::CFunction(_) | LuaValue::Function(_) => LuaValueKind::Function,
            LuaValue::String(_) => LuaValueKind::String,
            LuaValue::Table(_) => LuaValueKind::Table,
            LuaValue::Userdata(_) => LuaValueKind::Userdata,
            LuaValue::Thread(_) => LuaValueKind::Thread,
        }
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::String(_))
    }

    #[inline(always)]
    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    /// lobject.h: iscollectable
    #[inline(always)]
    pub fn is_collectable(&self) -> bool {
        self.as_gc_id().is_some()
    }

    #[inline]
    pub fn as_gc_id(&self) -> Option<GcId> {
        match self {
            LuaValue::String(id)
            | LuaValue::Table(id)
            | LuaValue::Function(id)
            | LuaValue::Userdata(id)
            | LuaValue::Thread(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table_id(&self) -> Option<GcId> {
        match self {
            LuaValue::Table(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Canonical form of a table key: floats with an exact integer value
    /// become integers, nil and NaN are rejected.
    pub fn normalize_key(self) -> LuaResult<LuaValue> {
        match self {
            LuaValue::Nil => Err(LuaError::InvalidKey),
            LuaValue::Float(f) if f.is_nan() => Err(LuaError::InvalidKey),
            LuaValue::Float(f) => {
                if f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63) {
                    Ok(LuaValue::Integer(f as i64))
                } else {
                    Ok(self)
                }
            }
            _ => Ok(self),
        }
    }
}

// Raw equality: collectable values compare by identity. Strings are
// interned, so identity is content equality for them as well.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a.to_bits() == b.to_bits(),
            (LuaValue::LightUserdata(a), LuaValue::LightUserdata(b)) => a == b,
            (LuaValue::CFunction(a), LuaValue::CFunction(b)) => *a as usize == *b as usize,
            (LuaValue::String(a), LuaValue::String(b))
            | (LuaValue::Table(a), LuaValue::Table(b))
            | (LuaValue::Function(a), LuaValue::Function(b))
            | (LuaValue::Userdata(a), LuaValue::Userdata(b))
            | (LuaValue::Thread(a), LuaValue::Thread(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LuaValue {}

impl Hash for LuaValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            LuaValue::Nil => {}
            LuaValue::Boolean(b) => b.hash(state),
            LuaValue::Integer(i) => i.hash(state),
            LuaValue::Float(f) => f.to_bits().hash(state),
            LuaValue::LightUserdata(p) => p.hash(state),
            LuaValue::CFunction(f) => (*f as usize).hash(state),
            LuaValue::String(id)
            | LuaValue::Table(id)
            | LuaValue::Function(id)
            | LuaValue::Userdata(id)
            | LuaValue::Thread(id) => id.hash(state),
        }
    }
}
