// LuaValue - tagged value stored in stacks, tables, upvalues and constants.
//
// Collectable variants carry a `GcId` into the heap arena; everything else is
// stored inline. The value is `Copy`, so traversals can snapshot references
// without borrowing the arena.
mod lua_function;
mod lua_string;
mod lua_table;
mod lua_thread;
mod lua_userdata;

use std::hash::{Hash, Hasher};

use crate::gc::GcId;

pub use lua_function::{LuaCaller, LuaClosure, LuaProto, LuaUpvalue, NativeClosure, NativeFunction};
pub use lua_string::LuaString;
pub use lua_table::LuaTable;
pub use lua_thread::LuaThread;
pub use lua_userdata::LuaUserdata;

/// Basic Lua types, indexing the per-type default metatables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LuaType {
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

/// Number of basic types
pub const LUA_NUMTYPES: usize = 9;

impl LuaType {
    pub fn name(self) -> &'static str {
        match self {
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Userdata => "userdata",
            LuaType::Thread => "thread",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    LightUserdata(usize),
    String(GcId),
    Table(GcId),
    /// Lua closure or native closure
    Function(GcId),
    Userdata(GcId),
    Thread(GcId),
}

impl LuaValue {
    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    #[inline(always)]
    pub fn is_collectable(&self) -> bool {
        self.as_gc_id().is_some()
    }

    /// The arena handle of a collectable value.
    #[inline(always)]
    pub fn as_gc_id(&self) -> Option<GcId> {
        match *self {
            LuaValue::String(id)
            | LuaValue::Table(id)
            | LuaValue::Function(id)
            | LuaValue::Userdata(id)
            | LuaValue::Thread(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            LuaValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_table_id(&self) -> Option<GcId> {
        match *self {
            LuaValue::Table(id) => Some(id),
            _ => None,
        }
    }

    pub fn lua_type(&self) -> LuaType {
        match self {
            LuaValue::Nil => LuaType::Nil,
            LuaValue::Boolean(_) => LuaType::Boolean,
            LuaValue::Integer(_) | LuaValue::Float(_) => LuaType::Number,
            LuaValue::LightUserdata(_) => LuaType::LightUserdata,
            LuaValue::String(_) => LuaType::String,
            LuaValue::Table(_) => LuaType::Table,
            LuaValue::Function(_) => LuaType::Function,
            LuaValue::Userdata(_) => LuaType::Userdata,
            LuaValue::Thread(_) => LuaType::Thread,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.lua_type().name()
    }

    /// Floats with an exact integer value are stored as integer keys.
    pub(crate) fn normalize_key(self) -> LuaValue {
        match self {
            LuaValue::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                LuaValue::Integer(f as i64)
            }
            v => v,
        }
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a.to_bits() == b.to_bits(),
            (LuaValue::LightUserdata(a), LuaValue::LightUserdata(b)) => a == b,
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
            LuaValue::String(id)
            | LuaValue::Table(id)
            | LuaValue::Function(id)
            | LuaValue::Userdata(id)
            | LuaValue::Thread(id) => id.hash(state),
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(i: i64) -> Self {
        LuaValue::Integer(i)
    }
}

impl From<f64> for LuaValue {
    fn from(n: f64) -> Self {
        LuaValue::Float(n)
    }
}
