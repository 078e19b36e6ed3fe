// LuaHeap - the explicit context every allocation, barrier and collector
// step goes through. One heap is one independent Lua state as far as
// memory is concerned; nothing here is global.
mod allocator;
mod gc_control;
mod lua_error;
mod mutator;
mod object_allocator;

pub use allocator::{Allocator, LimitedAllocator};
pub use lua_error::{LuaError, LuaResult};

use tracing::warn;

use crate::gc::gc_limits::{LUA_RIDX_GLOBALS, LUA_RIDX_MAINTHREAD, MINSTRTABSIZE};
use crate::gc::{
    GC, GcBody, GcHeader, GcId, GcKind, GcList, GcOption, GcPool, GcState, StringInterner,
};
use crate::lua_value::{
    LUA_NUMTYPES, LuaCaller, LuaClosure, LuaProto, LuaString, LuaTable, LuaThread, LuaType,
    LuaUpvalue, LuaUserdata, LuaValue, NativeClosure,
};

pub type WarnHandler = Box<dyn FnMut(&str)>;

pub struct LuaHeap {
    pub(crate) gc: GC,
    pub(crate) pool: GcPool,
    pub(crate) strings: StringInterner,
    allocator: Box<dyn Allocator>,

    // ===== Roots =====
    pub(crate) main_thread: GcId,
    /// Thread currently executing, marked again by the atomic step
    pub(crate) running: GcId,
    pub(crate) registry: LuaValue,
    /// Default metatables for types without individual metatables
    pub(crate) metatables: [Option<GcId>; LUA_NUMTYPES],

    // ===== Reserved metatable keys =====
    pub(crate) tm_gc: GcId,
    pub(crate) tm_mode: GcId,

    warn_handler: Option<WarnHandler>,
    pub(crate) caller: Option<Box<dyn LuaCaller>>,
}

impl LuaHeap {
    /// Create a heap with the default allocator bounded by
    /// `option.max_memory_limit`.
    pub fn new(option: GcOption) -> LuaResult<Self> {
        let allocator = Box::new(LimitedAllocator::new(option.max_memory_limit));
        Self::with_allocator(option, allocator)
    }

    pub fn with_allocator(option: GcOption, mut allocator: Box<dyn Allocator>) -> LuaResult<Self> {
        let base = std::mem::size_of::<LuaHeap>() + StringInterner::table_bytes(MINSTRTABSIZE);
        if !allocator.realloc(0, base) {
            return Err(LuaError::OutOfMemory);
        }
        let mut heap = LuaHeap {
            gc: GC::new(&option, base),
            pool: GcPool::new(),
            strings: StringInterner::new(),
            allocator,
            main_thread: GcId::default(),
            running: GcId::default(),
            registry: LuaValue::Nil,
            metatables: [None; LUA_NUMTYPES],
            tm_gc: GcId::default(),
            tm_mode: GcId::default(),
            warn_handler: None,
            caller: None,
        };

        // No emergency collections while the roots are incomplete
        heap.gc.gc_stopem = true;
        let main = heap.new_object(GcBody::Thread(LuaThread::default()))?;
        heap.main_thread = main;
        heap.running = main;
        heap.init_stack(main)?;

        let registry = heap.create_table(2, 0)?;
        heap.registry = LuaValue::Table(registry);
        let globals = heap.create_table(0, 0)?;
        heap.table_set(registry, LuaValue::Integer(LUA_RIDX_MAINTHREAD), LuaValue::Thread(main))?;
        heap.table_set(registry, LuaValue::Integer(LUA_RIDX_GLOBALS), LuaValue::Table(globals))?;

        heap.tm_gc = heap.create_fixed_string("__gc")?;
        heap.tm_mode = heap.create_fixed_string("__mode")?;
        heap.gc.gc_stopem = false;

        if option.mode == GcKind::Generational {
            heap.set_mode(GcKind::Generational);
        }
        Ok(heap)
    }

    // ============ Memory accounting ============

    /// Whether an emergency collection may run now
    fn can_try_again(&self) -> bool {
        !self.gc.gc_stopem && !self.gc.gc_emergency
    }

    /// Account a block resized from `old_size` to `new_size` bytes. A refused
    /// growth triggers one emergency full collection and a retry.
    pub(crate) fn mem_realloc(&mut self, old_size: usize, new_size: usize) -> LuaResult<()> {
        if !self.allocator.realloc(old_size, new_size) && new_size > old_size {
            if !self.can_try_again() {
                return Err(LuaError::OutOfMemory);
            }
            self.full_gc(true);
            if !self.allocator.realloc(old_size, new_size) {
                return Err(LuaError::OutOfMemory);
            }
        }
        self.gc.gc_debt += new_size as isize - old_size as isize;
        Ok(())
    }

    pub(crate) fn mem_free(&mut self, size: usize) {
        self.allocator.realloc(size, 0);
        self.gc.gc_debt -= size as isize;
    }

    /// Re-account an object whose payload changed size
    pub(crate) fn resize_object(&mut self, id: GcId, new_size: usize) -> LuaResult<()> {
        let old_size = self.header(id).size;
        if old_size == new_size {
            return Ok(());
        }
        self.mem_realloc(old_size, new_size)?;
        if let Some(obj) = self.pool.get_mut(id) {
            obj.header.size = new_size;
        }
        Ok(())
    }

    /// Shrink the accounted size of `id`; never fails and never collects
    pub(crate) fn shrink_object(&mut self, id: GcId, new_size: usize) {
        let old_size = self.header(id).size;
        if new_size >= old_size {
            return;
        }
        self.allocator.realloc(old_size, new_size);
        self.gc.gc_debt -= (old_size - new_size) as isize;
        self.header_mut(id).size = new_size;
    }

    // ============ Warnings ============

    /// Install the sink for collector warnings (finalizer failures)
    pub fn set_warn_handler(&mut self, handler: impl FnMut(&str) + 'static) {
        self.warn_handler = Some(Box::new(handler));
    }

    pub(crate) fn warn(&mut self, msg: &str) {
        warn!(target: "luars_gc", "{msg}");
        if let Some(handler) = self.warn_handler.as_mut() {
            handler(msg);
        }
    }

    /// Install the interpreter used to run Lua closures
    pub fn set_caller(&mut self, caller: Box<dyn LuaCaller>) {
        self.caller = Some(caller);
    }

    // ============ Roots ============

    pub fn main_thread(&self) -> GcId {
        self.main_thread
    }

    pub fn running_thread(&self) -> GcId {
        self.running
    }

    /// Switch the thread treated as running by the atomic step
    pub fn set_running_thread(&mut self, thread: GcId) {
        if self.thread(thread).is_some() {
            self.running = thread;
        }
    }

    pub fn registry(&self) -> GcId {
        match self.registry {
            LuaValue::Table(id) => id,
            _ => unreachable!("registry is always a table"),
        }
    }

    pub fn globals(&self) -> GcId {
        let g = self.table_get(self.registry(), LuaValue::Integer(LUA_RIDX_GLOBALS));
        match g {
            LuaValue::Table(id) => id,
            _ => unreachable!("registry holds the globals table"),
        }
    }

    pub fn type_metatable(&self, ty: LuaType) -> Option<GcId> {
        self.metatables[ty as usize]
    }

    // ============ Object access ============

    pub fn contains(&self, id: GcId) -> bool {
        self.pool.contains(id)
    }

    /// Number of live objects, pinned ones included
    pub fn object_count(&self) -> usize {
        self.pool.len()
    }

    pub fn object_header(&self, id: GcId) -> Option<GcHeader> {
        self.pool.get(id).map(|o| o.header)
    }

    pub fn string(&self, id: GcId) -> Option<&LuaString> {
        self.pool.get(id)?.as_string()
    }

    pub fn str_value(&self, v: LuaValue) -> Option<&str> {
        match v {
            LuaValue::String(id) => self.string(id).map(LuaString::as_str),
            _ => None,
        }
    }

    pub fn table(&self, id: GcId) -> Option<&LuaTable> {
        self.pool.get(id)?.as_table()
    }

    pub fn userdata(&self, id: GcId) -> Option<&LuaUserdata> {
        self.pool.get(id)?.as_userdata()
    }

    pub fn userdata_mut(&mut self, id: GcId) -> Option<&mut LuaUserdata> {
        self.pool.get_mut(id)?.as_userdata_mut()
    }

    pub fn thread(&self, id: GcId) -> Option<&LuaThread> {
        self.pool.get(id)?.as_thread()
    }

    pub fn proto(&self, id: GcId) -> Option<&LuaProto> {
        self.pool.get(id)?.as_proto()
    }

    pub fn lua_closure(&self, id: GcId) -> Option<&LuaClosure> {
        self.pool.get(id)?.as_lua_closure()
    }

    pub fn native_closure(&self, id: GcId) -> Option<&NativeClosure> {
        self.pool.get(id)?.as_native_closure()
    }

    pub fn upvalue(&self, id: GcId) -> Option<&LuaUpvalue> {
        self.pool.get(id)?.as_upvalue()
    }

    // ============ Shutdown ============

    /// Run every pending finalizer, including those of still reachable
    /// objects, then release all objects.
    pub fn close(mut self) {
        self.gc.gc_closing = true;
        self.change_mode(GcKind::Incremental);
        self.separate_tobefnz(true);
        debug_assert!(self.gc.finobj.is_none());
        self.call_all_pending_finalizers();
        let all = self.gc.allgc.take();
        self.delete_list(all);
        let fixed = self.gc.fixedgc.take();
        self.delete_list(fixed);
        debug_assert_eq!(self.strings.nuse(), 0);
    }

    fn delete_list(&mut self, mut p: Option<GcId>) {
        while let Some(curr) = p {
            p = self.pool[curr].next;
            self.free_object(curr);
        }
    }

    // ============ Debug checks ============

    /// Panic if a black object references a white one while the collector
    /// relies on the tri-color invariant (incremental mode, before sweep).
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariant(&self) {
        if self.gc.gc_kind != GcKind::Incremental || !self.gc.keep_invariant() {
            return;
        }
        let mut refs = Vec::new();
        for (id, obj) in self.pool.iter() {
            if !obj.header.is_black() {
                continue;
            }
            refs.clear();
            match &obj.body {
                // Threads are revisited atomically
                GcBody::Thread(_) => continue,
                GcBody::Table(t) => {
                    let (_, weak_keys, weak_values) = self.weak_mode(id);
                    refs.extend(t.metatable());
                    for (k, v) in t.hash.iter() {
                        if !weak_keys {
                            refs.extend(k.as_gc_id());
                        }
                        if !weak_values {
                            refs.extend(v.as_gc_id());
                        }
                    }
                    if !weak_values {
                        refs.extend(t.array.iter().filter_map(LuaValue::as_gc_id));
                    }
                }
                body => body.collect_refs(&mut refs),
            }
            for &r in &refs {
                assert!(
                    !self.pool[r].header.is_white(),
                    "black object {id:?} ({:?}) references white object {r:?} ({:?}) in state {:?}",
                    obj.kind(),
                    self.pool[r].kind(),
                    self.gc.gc_state
                );
            }
        }
    }

    pub(crate) fn list_len(&self, list: GcList) -> usize {
        let mut n = 0;
        let mut p = self.get_link(crate::gc::Link::Head(list));
        while let Some(id) = p {
            n += 1;
            p = self.pool[id].next;
        }
        n
    }

    pub fn gc_state(&self) -> GcState {
        self.gc.gc_state
    }
}
