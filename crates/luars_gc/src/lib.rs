// Lua Heap
// A tracing, incremental and generational garbage collector for a Lua
// runtime, with weak tables, ephemerons and finalizers.
//
// The heap is an explicit value: every allocation, write and collector step
// goes through a `LuaHeap`. Collection work runs only at checkpoints
// (`LuaHeap::check_gc`), on explicit requests, and as an emergency collection
// when the allocator refuses memory.

#[cfg(test)]
mod test;

pub mod gc;
pub mod lua_heap;
pub mod lua_value;

pub use gc::{GcAge, GcHeader, GcId, GcKind, GcObjectKind, GcOption, GcParams, GcState, GcStats};
pub use lua_heap::{Allocator, LimitedAllocator, LuaError, LuaHeap, LuaResult};
pub use lua_value::{LuaCaller, LuaType, LuaValue};
