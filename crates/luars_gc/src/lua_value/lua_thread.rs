use super::LuaValue;
use crate::gc::GcId;

/// An execution context (coroutine). Only the value stack and the open
/// upvalue list matter to the collector.
#[derive(Debug, Default)]
pub struct LuaThread {
    /// `None` while the thread is still being built
    pub(crate) stack: Option<Vec<LuaValue>>,
    /// First free slot
    pub(crate) top: usize,
    /// Open upvalues sorted by decreasing stack level
    pub(crate) open_upvalues: Vec<GcId>,
    /// Whether the thread is linked in the threads-with-upvalues list
    pub(crate) in_twups: bool,
}

impl LuaThread {
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Vec::len)
    }

    pub fn is_built(&self) -> bool {
        self.stack.is_some()
    }

    pub fn get(&self, idx: usize) -> LuaValue {
        match &self.stack {
            Some(stack) if idx < self.top => stack[idx],
            _ => LuaValue::Nil,
        }
    }

    /// Raw slot access, ignoring top
    pub(crate) fn get_slot(&self, idx: usize) -> LuaValue {
        self.stack
            .as_ref()
            .and_then(|stack| stack.get(idx).copied())
            .unwrap_or_default()
    }

    pub fn open_upvalues(&self) -> &[GcId] {
        &self.open_upvalues
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaThread>()
            + self.stack_size() * std::mem::size_of::<LuaValue>()
    }
}
