// Mutator API
//
// Every store of a reference into an existing object goes through one of
// these methods, each of which runs the matching write barrier right after
// the store:
// - containers (tables, userdata user values) use the back barrier
// - closures, prototypes and closed upvalues use the forward barrier
// - stack slots need none: threads are always revisited atomically
//
// Objects handed to these methods must be reachable from a root across any
// call that can allocate.
use super::{LuaError, LuaHeap, LuaResult};
use crate::gc::gc_limits::LUAI_MAXSTACK;
use crate::gc::{GcAge, GcBody, GcId, GcList, Link};
use crate::lua_value::{LuaProto, LuaTable, LuaThread, LuaUpvalue, LuaValue};

impl LuaHeap {
    fn table_mut(&mut self, id: GcId) -> LuaResult<&mut LuaTable> {
        self.pool
            .get_mut(id)
            .and_then(|o| o.as_table_mut())
            .ok_or_else(|| LuaError::RuntimeError(format!("object {id:?} is not a table")))
    }

    fn thread_mut(&mut self, id: GcId) -> LuaResult<&mut LuaThread> {
        self.pool
            .get_mut(id)
            .and_then(|o| o.as_thread_mut())
            .ok_or_else(|| LuaError::RuntimeError(format!("object {id:?} is not a thread")))
    }

    fn proto_mut(&mut self, id: GcId) -> LuaResult<&mut LuaProto> {
        self.pool
            .get_mut(id)
            .and_then(|o| o.as_proto_mut())
            .ok_or_else(|| LuaError::RuntimeError(format!("object {id:?} is not a prototype")))
    }

    /// Bring the accounted size of `id` in line with its payload
    pub(crate) fn sync_object_size(&mut self, id: GcId) -> LuaResult<()> {
        let new_size = self.pool[id].body.mem_size();
        self.resize_object(id, new_size)
    }

    // ==================== Tables ====================

    pub fn table_get(&self, t: GcId, key: LuaValue) -> LuaValue {
        self.table(t).map(|tbl| tbl.raw_get(&key)).unwrap_or_default()
    }

    /// Raw assignment `t[key] = value`. A refused growth leaves the table
    /// as it was.
    pub fn table_set(&mut self, t: GcId, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        match key {
            LuaValue::Nil => return Err(LuaError::InvalidKey("index is nil")),
            LuaValue::Float(f) if f.is_nan() => return Err(LuaError::InvalidKey("index is NaN")),
            _ => {}
        }
        let table = self.table_mut(t)?;
        let old = table.raw_get(&key);
        table.raw_set(key, value);
        if let Err(e) = self.sync_object_size(t) {
            if let Some(table) = self.pool.get_mut(t).and_then(|o| o.as_table_mut()) {
                table.raw_set(key, old);
            }
            return Err(e);
        }
        self.barrier_back(t, key);
        self.barrier_back(t, value);
        Ok(())
    }

    /// Lookup by string key without creating the string
    pub fn table_get_str(&self, t: GcId, key: &str) -> LuaValue {
        match self.find_string(key) {
            Some(id) => self.table_get(t, LuaValue::String(id)),
            None => LuaValue::Nil,
        }
    }

    pub fn table_set_str(&mut self, t: GcId, key: &str, value: LuaValue) -> LuaResult<()> {
        let key = self.create_string_value(key)?;
        self.table_set(t, key, value)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        let globals = self.globals();
        self.table_set_str(globals, name, value)
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.table_get_str(self.globals(), name)
    }

    pub(crate) fn find_string(&self, s: &str) -> Option<GcId> {
        let hash = self.strings.hash_string(s);
        if s.len() > crate::gc::gc_limits::LUAI_MAXSHORTLEN {
            return None;
        }
        self.strings.find(&self.pool, s, hash)
    }

    // ==================== Metatables ====================

    pub fn get_metatable(&self, v: LuaValue) -> Option<GcId> {
        match v {
            LuaValue::Table(id) => self.table(id)?.metatable(),
            LuaValue::Userdata(id) => self.userdata(id)?.metatable(),
            other => self.metatables[other.lua_type() as usize],
        }
    }

    /// Set the metatable of a value. Tables and userdata carry their own;
    /// every other type shares one per type. A metatable with a `__gc`
    /// field marks the object for finalization.
    pub fn set_metatable(&mut self, v: LuaValue, mt: Option<GcId>) -> LuaResult<()> {
        if let Some(m) = mt {
            if self.table(m).is_none() {
                return Err(LuaError::RuntimeError("metatable must be a table".to_string()));
            }
        }
        let id = match v {
            LuaValue::Table(id) => {
                self.table_mut(id)?.set_metatable(mt);
                id
            }
            LuaValue::Userdata(id) => {
                let udata = self
                    .pool
                    .get_mut(id)
                    .and_then(|o| o.as_userdata_mut())
                    .ok_or_else(|| LuaError::RuntimeError(format!("object {id:?} is not a userdata")))?;
                udata.set_metatable(mt);
                id
            }
            other => {
                self.metatables[other.lua_type() as usize] = mt;
                return Ok(());
            }
        };
        if let Some(m) = mt {
            self.obj_barrier(id, m);
            self.check_finalizer(id, m);
        }
        Ok(())
    }

    /// Default metatable for every value of `ty` without its own
    pub fn set_type_metatable(&mut self, ty: crate::lua_value::LuaType, mt: Option<GcId>) {
        self.metatables[ty as usize] = mt;
    }

    // ==================== Userdata ====================

    /// Set user value `n`. Returns false when the userdata has no such slot.
    pub fn set_user_value(&mut self, ud: GcId, n: usize, value: LuaValue) -> bool {
        let Some(udata) = self.pool.get_mut(ud).and_then(|o| o.as_userdata_mut()) else {
            return false;
        };
        let Some(slot) = udata.user_values.get_mut(n) else {
            return false;
        };
        *slot = value;
        self.barrier_back(ud, value);
        true
    }

    // ==================== Functions ====================

    pub fn proto_add_constant(&mut self, p: GcId, value: LuaValue) -> LuaResult<()> {
        self.proto_mut(p)?.constants.push(value);
        self.sync_object_size(p)?;
        self.barrier(p, value);
        Ok(())
    }

    pub fn proto_add_child(&mut self, p: GcId, child: GcId) -> LuaResult<()> {
        self.proto_mut(p)?.protos.push(child);
        self.sync_object_size(p)?;
        self.obj_barrier(p, child);
        Ok(())
    }

    pub fn proto_set_source(&mut self, p: GcId, source: GcId) -> LuaResult<()> {
        self.proto_mut(p)?.source = Some(source);
        self.obj_barrier(p, source);
        Ok(())
    }

    pub fn proto_add_upvalue_name(&mut self, p: GcId, name: Option<GcId>) -> LuaResult<()> {
        self.proto_mut(p)?.upvalue_names.push(name);
        self.sync_object_size(p)?;
        if let Some(name) = name {
            self.obj_barrier(p, name);
        }
        Ok(())
    }

    pub fn proto_add_local_name(&mut self, p: GcId, name: Option<GcId>) -> LuaResult<()> {
        self.proto_mut(p)?.local_names.push(name);
        self.sync_object_size(p)?;
        if let Some(name) = name {
            self.obj_barrier(p, name);
        }
        Ok(())
    }

    /// Bind upvalue slot `n` of a Lua closure. Returns false for a bad slot.
    pub fn closure_set_upvalue(&mut self, f: GcId, n: usize, uv: GcId) -> bool {
        let Some(slot) = self
            .pool
            .get_mut(f)
            .and_then(|o| o.as_lua_closure_mut())
            .and_then(|cl| cl.upvalues.get_mut(n))
        else {
            return false;
        };
        *slot = Some(uv);
        self.obj_barrier(f, uv);
        true
    }

    pub fn native_set_upvalue(&mut self, f: GcId, n: usize, value: LuaValue) -> bool {
        let Some(slot) = self
            .pool
            .get_mut(f)
            .and_then(|o| o.as_native_closure_mut())
            .and_then(|cl| cl.upvalues.get_mut(n))
        else {
            return false;
        };
        *slot = value;
        self.barrier(f, value);
        true
    }

    // ==================== Thread stacks ====================

    pub fn push(&mut self, th: GcId, value: LuaValue) -> LuaResult<()> {
        let thread = self.thread_mut(th)?;
        if !thread.is_built() {
            return Err(LuaError::RuntimeError("thread stack is not built".to_string()));
        }
        let (top, size) = (thread.top, thread.stack_size());
        if top == size {
            self.grow_stack(th, top + 1)?;
        }
        let thread = self.thread_mut(th)?;
        if let Some(stack) = thread.stack.as_mut() {
            stack[top] = value;
            thread.top = top + 1;
        }
        Ok(())
    }

    /// Pop the top value. An open upvalue on the popped slot is closed first.
    pub fn pop(&mut self, th: GcId) -> Option<LuaValue> {
        let top = self.pool.get(th)?.as_thread()?.top;
        if top == 0 {
            return None;
        }
        self.close_upvalues(th, top - 1);
        let thread = self.pool.get_mut(th)?.as_thread_mut()?;
        thread.top = top - 1;
        Some(thread.get_slot(top - 1))
    }

    pub fn stack_get(&self, th: GcId, idx: usize) -> LuaValue {
        self.thread(th).map(|t| t.get(idx)).unwrap_or_default()
    }

    /// Overwrite a live stack slot. Returns false when `idx` is not below top.
    pub fn stack_set(&mut self, th: GcId, idx: usize, value: LuaValue) -> bool {
        let Some(thread) = self.pool.get_mut(th).and_then(|o| o.as_thread_mut()) else {
            return false;
        };
        match thread.stack.as_mut() {
            Some(stack) if idx < thread.top => {
                stack[idx] = value;
                true
            }
            _ => false,
        }
    }

    /// Move the top, filling newly exposed slots with nil. Lowering the top
    /// closes the open upvalues of the dropped slots.
    pub fn set_top(&mut self, th: GcId, new_top: usize) -> LuaResult<()> {
        let thread = self.thread_mut(th)?;
        let (size, top) = (thread.stack_size(), thread.top);
        if new_top > size {
            self.grow_stack(th, new_top)?;
        } else if new_top < top {
            self.close_upvalues(th, new_top);
        }
        let thread = self.thread_mut(th)?;
        let old_top = thread.top;
        if let Some(stack) = thread.stack.as_mut() {
            if new_top > old_top {
                stack[old_top..new_top].fill(LuaValue::Nil);
            }
            thread.top = new_top;
        }
        Ok(())
    }

    /// Grow the stack to hold at least `needed` slots, doubling its size
    fn grow_stack(&mut self, th: GcId, needed: usize) -> LuaResult<()> {
        let size = self.thread_mut(th)?.stack_size();
        if needed > LUAI_MAXSTACK {
            return Err(LuaError::RuntimeError("stack overflow".to_string()));
        }
        let new_len = (size * 2).max(needed).min(LUAI_MAXSTACK);
        let grown = (new_len - size) * std::mem::size_of::<LuaValue>();
        let new_bytes = self.header(th).size + grown;
        self.resize_object(th, new_bytes)?;
        let thread = self.thread_mut(th)?;
        if let Some(stack) = thread.stack.as_mut() {
            stack.resize(new_len, LuaValue::Nil);
        }
        Ok(())
    }

    // ==================== Upvalues ====================

    fn open_level(&self, uv: GcId) -> Option<usize> {
        match self.pool[uv].as_upvalue()? {
            LuaUpvalue::Open { level, .. } => Some(*level),
            LuaUpvalue::Closed(_) => None,
        }
    }

    /// Open upvalue for stack slot `level` of `th`, shared with any closure
    /// that already captured the same slot.
    pub fn find_upvalue(&mut self, th: GcId, level: usize) -> LuaResult<GcId> {
        let thread = self.thread_mut(th)?;
        if level >= thread.top {
            return Err(LuaError::RuntimeError("upvalue level above stack top".to_string()));
        }
        let open = thread.open_upvalues.clone();
        for uv in open {
            match self.open_level(uv) {
                Some(l) if l == level => return Ok(uv),
                Some(l) if l < level => break,
                _ => {}
            }
        }

        let uv = self.new_object(GcBody::Upvalue(LuaUpvalue::Open { thread: th, level }))?;
        let list = self.thread(th).map(|t| t.open_upvalues.clone()).unwrap_or_default();
        let pos = list
            .iter()
            .position(|&u| self.open_level(u).is_some_and(|l| l < level))
            .unwrap_or(list.len());
        let thread = self.thread_mut(th)?;
        thread.open_upvalues.insert(pos, uv);
        if !thread.in_twups {
            thread.in_twups = true;
            self.gc.twups.push(th);
        }
        Ok(uv)
    }

    /// Close every open upvalue of `th` at or above `level`
    pub fn close_upvalues(&mut self, th: GcId, level: usize) {
        loop {
            let Some(thread) = self.pool.get(th).and_then(|o| o.as_thread()) else {
                return;
            };
            let Some(&uv) = thread.open_upvalues.first() else {
                return;
            };
            let Some(l) = self.open_level(uv) else {
                return;
            };
            if l < level {
                return;
            }
            let value = thread.get_slot(l);
            if let Some(thread) = self.pool[th].as_thread_mut() {
                thread.open_upvalues.remove(0);
            }
            self.close_one_upvalue(uv, value);
        }
    }

    /// Move `value` into an upvalue being closed. A visited upvalue becomes
    /// black and must not point to a white value.
    pub(crate) fn close_one_upvalue(&mut self, uv: GcId, value: LuaValue) {
        let Some(obj) = self.pool.get_mut(uv) else {
            return;
        };
        if let Some(u) = obj.as_upvalue_mut() {
            *u = LuaUpvalue::Closed(value);
        }
        if !obj.header.is_white() {
            obj.header.nw2black();
            self.barrier(uv, value);
        }
    }

    pub fn upvalue_get(&self, uv: GcId) -> LuaValue {
        match self.upvalue(uv) {
            Some(LuaUpvalue::Open { thread, level }) => self
                .thread(*thread)
                .map(|t| t.get_slot(*level))
                .unwrap_or_default(),
            Some(LuaUpvalue::Closed(v)) => *v,
            None => LuaValue::Nil,
        }
    }

    pub fn upvalue_set(&mut self, uv: GcId, value: LuaValue) {
        let Some(upvalue) = self.pool.get_mut(uv).and_then(|o| o.as_upvalue_mut()) else {
            return;
        };
        let open = match upvalue {
            LuaUpvalue::Open { thread, level } => Some((*thread, *level)),
            LuaUpvalue::Closed(v) => {
                *v = value;
                None
            }
        };
        match open {
            Some((thread, level)) => {
                let slot = self
                    .pool
                    .get_mut(thread)
                    .and_then(|o| o.as_thread_mut())
                    .and_then(|t| t.stack.as_mut())
                    .and_then(|stack| stack.get_mut(level));
                if let Some(slot) = slot {
                    *slot = value;
                }
            }
            None => self.barrier(uv, value),
        }
    }

    // ==================== Pinning ====================

    /// Move a string from `allgc` to the pinned list. Pinned objects stay
    /// gray and old forever and are released only when the heap closes.
    pub fn fix(&mut self, id: GcId) -> bool {
        if !matches!(self.pool.get(id).map(|o| &o.body), Some(GcBody::String(_))) {
            return false;
        }
        let Some(link) = self.find_link(Link::Head(GcList::AllGc), id) else {
            return false;
        };
        self.correct_pointers(id);
        if self.gc.sweepgc == Some(Link::Next(id)) {
            self.gc.sweepgc = Some(link);
        }
        let next = self.pool[id].next;
        self.set_link(link, next);
        let header = self.header_mut(id);
        header.make_gray();
        header.set_age(GcAge::Old);
        self.pool[id].next = self.gc.fixedgc;
        self.gc.fixedgc = Some(id);
        true
    }
}
