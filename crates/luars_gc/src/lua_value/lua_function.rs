use std::rc::Rc;

use super::LuaValue;
use crate::gc::GcId;
use crate::lua_heap::{LuaHeap, LuaResult};

/// Host function body. Receives the heap and the call arguments.
pub type NativeFunction = Rc<dyn Fn(&mut LuaHeap, &[LuaValue]) -> LuaResult<()>>;

/// Entry point into the interpreter, used to run Lua closures installed as
/// finalizers. The heap itself never interprets bytecode.
pub trait LuaCaller {
    fn call(&mut self, heap: &mut LuaHeap, func: LuaValue, args: &[LuaValue]) -> LuaResult<()>;
}

/// Function prototype as produced by the compiler. Only the parts the
/// collector traverses are modeled.
#[derive(Debug, Default)]
pub struct LuaProto {
    /// Chunk name
    pub(crate) source: Option<GcId>,
    pub(crate) constants: Vec<LuaValue>,
    pub(crate) upvalue_names: Vec<Option<GcId>>,
    /// Nested prototypes
    pub(crate) protos: Vec<GcId>,
    pub(crate) local_names: Vec<Option<GcId>>,
}

impl LuaProto {
    pub fn source(&self) -> Option<GcId> {
        self.source
    }

    pub fn constants(&self) -> &[LuaValue] {
        &self.constants
    }

    pub fn protos(&self) -> &[GcId] {
        &self.protos
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaProto>()
            + self.constants.len() * std::mem::size_of::<LuaValue>()
            + (self.upvalue_names.len() + self.local_names.len()) * std::mem::size_of::<Option<GcId>>()
            + self.protos.len() * std::mem::size_of::<GcId>()
    }
}

/// Lua closure: a prototype plus its captured upvalues.
#[derive(Debug)]
pub struct LuaClosure {
    pub(crate) proto: GcId,
    /// Filled after creation, `None` until then
    pub(crate) upvalues: Vec<Option<GcId>>,
}

impl LuaClosure {
    pub fn proto(&self) -> GcId {
        self.proto
    }

    pub fn upvalue(&self, n: usize) -> Option<GcId> {
        self.upvalues.get(n).copied().flatten()
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaClosure>() + self.upvalues.len() * std::mem::size_of::<Option<GcId>>()
    }
}

/// Native closure: a host function plus value upvalues.
pub struct NativeClosure {
    pub(crate) func: NativeFunction,
    pub(crate) upvalues: Vec<LuaValue>,
}

impl NativeClosure {
    pub fn func(&self) -> NativeFunction {
        self.func.clone()
    }

    pub fn upvalue(&self, n: usize) -> LuaValue {
        self.upvalues.get(n).copied().unwrap_or_default()
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<NativeClosure>() + self.upvalues.len() * std::mem::size_of::<LuaValue>()
    }
}

/// A captured local. Open upvalues point at a live stack slot of their
/// thread, closed upvalues own their value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LuaUpvalue {
    Open { thread: GcId, level: usize },
    Closed(LuaValue),
}

impl LuaUpvalue {
    #[inline(always)]
    pub fn is_open(&self) -> bool {
        matches!(self, LuaUpvalue::Open { .. })
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaUpvalue>()
    }
}
