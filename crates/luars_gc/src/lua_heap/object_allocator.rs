// Object creation
//
// Every constructor goes through `new_object`, which charges the allocator
// (possibly running an emergency collection) before the object enters the
// arena. A new object is born with the current white at the head of `allgc`,
// so an in-progress sweep never sees it.
//
// Handles stored inside a new body (a closure's prototype, native upvalues)
// must stay reachable from a root while the object is created.
use std::any::Any;

use super::{LuaHeap, LuaResult};
use crate::gc::gc_limits::{BASIC_STACK_SIZE, LUAI_MAXSHORTLEN, MAXSTRTB};
use crate::gc::{GcBody, GcHeader, GcId, GcObject, StringInterner};
use crate::lua_value::{
    LuaClosure, LuaProto, LuaString, LuaTable, LuaThread, LuaUserdata, LuaValue, NativeClosure,
};
use std::rc::Rc;

impl LuaHeap {
    pub(crate) fn new_object(&mut self, body: GcBody) -> LuaResult<GcId> {
        let size = body.mem_size();
        self.mem_realloc(0, size)?;
        let id = self.pool.alloc(GcObject {
            header: GcHeader::with_white(self.gc.current_white, size),
            next: self.gc.allgc,
            body,
        });
        self.gc.allgc = Some(id);
        Ok(id)
    }

    // ==================== Strings ====================

    /// Create or reuse a string. Short strings are interned; looking one up
    /// revives it if the collector already declared it dead but has not
    /// swept it yet.
    pub fn create_string(&mut self, s: &str) -> LuaResult<GcId> {
        let hash = self.strings.hash_string(s);
        if s.len() > LUAI_MAXSHORTLEN {
            return self.new_object(GcBody::String(LuaString::new(s, hash, false)));
        }
        if let Some(id) = self.strings.find(&self.pool, s, hash) {
            let other_white = self.gc.other_white();
            let header = self.header_mut(id);
            if header.is_dead(other_white) {
                header.change_white();
            }
            return Ok(id);
        }
        if self.strings.nuse() >= self.strings.size() {
            self.grow_string_table();
        }
        let id = self.new_object(GcBody::String(LuaString::new(s, hash, true)))?;
        self.strings.insert(id, hash);
        Ok(id)
    }

    pub fn create_string_value(&mut self, s: &str) -> LuaResult<LuaValue> {
        Ok(LuaValue::String(self.create_string(s)?))
    }

    fn grow_string_table(&mut self) {
        let size = self.strings.size();
        if size < MAXSTRTB {
            // Failing to grow only costs lookup speed
            let _ = self.resize_string_table(size * 2);
        }
    }

    /// Rehash the intern table into `new_size` buckets
    pub(crate) fn resize_string_table(&mut self, new_size: usize) -> LuaResult<()> {
        let old_bytes = StringInterner::table_bytes(self.strings.size());
        self.mem_realloc(old_bytes, StringInterner::table_bytes(new_size))?;
        self.strings.resize(&self.pool, new_size);
        Ok(())
    }

    /// Create a string that is never collected
    pub(crate) fn create_fixed_string(&mut self, s: &str) -> LuaResult<GcId> {
        let id = self.create_string(s)?;
        self.fix(id);
        Ok(id)
    }

    // ==================== Tables and userdata ====================

    pub fn create_table(&mut self, array_size: usize, hash_size: usize) -> LuaResult<GcId> {
        self.new_object(GcBody::Table(LuaTable::new(array_size, hash_size)))
    }

    /// Full userdata owning `value`, with `num_user_values` nil user values
    pub fn create_userdata<T: Any>(&mut self, value: T, num_user_values: usize) -> LuaResult<GcId> {
        let payload_size = std::mem::size_of::<T>();
        let udata = LuaUserdata::new(Box::new(value), payload_size, num_user_values);
        self.new_object(GcBody::Userdata(udata))
    }

    // ==================== Functions ====================

    pub fn create_proto(&mut self) -> LuaResult<GcId> {
        self.new_object(GcBody::Proto(LuaProto::default()))
    }

    /// Lua closure over `proto` with `num_upvalues` unset upvalue slots
    pub fn create_lua_closure(&mut self, proto: GcId, num_upvalues: usize) -> LuaResult<GcId> {
        self.new_object(GcBody::LuaClosure(LuaClosure {
            proto,
            upvalues: vec![None; num_upvalues],
        }))
    }

    pub fn create_native_closure<F>(&mut self, func: F, upvalues: Vec<LuaValue>) -> LuaResult<GcId>
    where
        F: Fn(&mut LuaHeap, &[LuaValue]) -> LuaResult<()> + 'static,
    {
        self.new_object(GcBody::NativeClosure(NativeClosure {
            func: Rc::new(func),
            upvalues,
        }))
    }

    // ==================== Threads ====================

    /// Create a coroutine. The thread is anchored on the running thread's
    /// stack before its own stack exists, so a collection triggered by the
    /// stack allocation sees a thread with nothing to traverse.
    pub fn create_thread(&mut self) -> LuaResult<GcId> {
        let id = self.new_object(GcBody::Thread(LuaThread::default()))?;
        self.push(self.running, LuaValue::Thread(id))?;
        self.init_stack(id)?;
        Ok(id)
    }

    pub(crate) fn init_stack(&mut self, id: GcId) -> LuaResult<()> {
        let new_size = self.header(id).size + BASIC_STACK_SIZE * std::mem::size_of::<LuaValue>();
        self.resize_object(id, new_size)?;
        if let Some(th) = self.pool[id].as_thread_mut() {
            th.stack = Some(vec![LuaValue::Nil; BASIC_STACK_SIZE]);
            th.top = 0;
        }
        Ok(())
    }
}
