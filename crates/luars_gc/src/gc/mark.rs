// Mark-propagate engine
//
// Marking turns white objects gray and links them into `gray`; leaves
// (strings, userdata without user values, upvalues) go straight to black.
// `propagate_mark` pops one gray object, blackens it and traverses it,
// returning an estimate of the work done for the pacer.
//
// Open upvalues are gray without list membership: their value lives in
// the owning thread's stack and is reached through the thread, or through
// `remark_upvalues` when the thread itself is not marked.
use super::gc_limits::{LUA_MINSTACK, LUAI_MAXSTACK};
use super::{GcAge, GcBody, GcId, GcObjectKind, GcState};
use crate::lua_heap::LuaHeap;
use crate::lua_value::{LuaUpvalue, LuaValue};

impl LuaHeap {
    #[inline]
    pub(crate) fn mark_value(&mut self, v: LuaValue) {
        if let Some(id) = v.as_gc_id() {
            self.mark_object(id);
        }
    }

    #[inline]
    pub(crate) fn mark_object(&mut self, id: GcId) {
        if self.header(id).is_white() {
            self.really_mark_object(id);
        }
    }

    #[inline]
    pub(crate) fn mark_object_opt(&mut self, id: Option<GcId>) {
        if let Some(id) = id {
            self.mark_object(id);
        }
    }

    /// Mark an object regardless of its current color
    pub(crate) fn really_mark_object(&mut self, id: GcId) {
        let obj = &mut self.pool[id];
        match &obj.body {
            GcBody::String(_) => obj.header.make_black(),
            GcBody::Upvalue(uv) => {
                if uv.is_open() {
                    obj.header.make_gray();
                } else {
                    obj.header.make_black();
                }
                let value = self.upvalue_value(id);
                self.mark_value(value);
            }
            GcBody::Userdata(u) if u.num_user_values() == 0 => {
                let mt = u.metatable();
                obj.header.make_black();
                self.mark_object_opt(mt);
            }
            _ => {
                obj.header.make_gray();
                self.gc.gray.push(id);
            }
        }
    }

    /// Current value of an upvalue, reading open ones from their stack
    pub(crate) fn upvalue_value(&self, uv: GcId) -> LuaValue {
        match self.pool[uv].as_upvalue() {
            Some(LuaUpvalue::Closed(v)) => *v,
            Some(LuaUpvalue::Open { thread, level }) => self
                .pool
                .get(*thread)
                .and_then(|o| o.as_thread())
                .map(|t| t.get_slot(*level))
                .unwrap_or_default(),
            None => LuaValue::Nil,
        }
    }

    /// Roots: main thread, registry, type metatables and objects still
    /// waiting for their finalizer from the previous cycle
    pub(crate) fn restart_collection(&mut self) {
        self.gc.clear_gray_lists();
        self.mark_object(self.main_thread);
        self.mark_value(self.registry);
        self.mark_metatables();
        self.mark_being_finalized();
    }

    pub(crate) fn mark_metatables(&mut self) {
        for i in 0..self.metatables.len() {
            self.mark_object_opt(self.metatables[i]);
        }
    }

    /// Mark everything in `tobefnz`, returning how many objects it holds
    pub(crate) fn mark_being_finalized(&mut self) -> usize {
        let mut count = 0;
        let mut p = self.gc.tobefnz;
        while let Some(id) = p {
            count += 1;
            self.mark_object(id);
            p = self.pool[id].next;
        }
        count
    }

    /// Threads that are unmarked (or lost their upvalues) leave `twups`;
    /// the values of their visited upvalues are marked as a barrier would.
    pub(crate) fn remark_upvalues(&mut self) -> usize {
        let mut work = 0;
        let mut i = 0;
        while i < self.gc.twups.len() {
            let th = self.gc.twups[i];
            work += 1;
            let thread = self.pool[th].as_thread();
            let has_upvalues = thread.is_some_and(|t| !t.open_upvalues.is_empty());
            if !self.header(th).is_white() && has_upvalues {
                i += 1;
                continue;
            }
            self.gc.twups.swap_remove(i);
            let open = match self.pool[th].as_thread_mut() {
                Some(t) => {
                    t.in_twups = false;
                    t.open_upvalues.clone()
                }
                None => Vec::new(),
            };
            for uv in open {
                work += 1;
                if !self.header(uv).is_white() {
                    let value = self.upvalue_value(uv);
                    self.mark_value(value);
                }
            }
        }
        work
    }

    // ============ Propagation ============

    /// Traverse one gray object
    pub(crate) fn propagate_mark(&mut self) -> usize {
        let Some(id) = self.gc.gray.pop() else {
            return 0;
        };
        self.header_mut(id).nw2black();
        match self.pool[id].kind() {
            GcObjectKind::Table => self.traverse_table(id),
            GcObjectKind::Userdata => self.traverse_userdata(id),
            GcObjectKind::LuaClosure | GcObjectKind::NativeClosure | GcObjectKind::Proto => {
                self.traverse_strong(id)
            }
            GcObjectKind::Thread => self.traverse_thread(id),
            GcObjectKind::ShortString | GcObjectKind::LongString | GcObjectKind::Upvalue => 1,
        }
    }

    pub(crate) fn propagate_all(&mut self) -> usize {
        let mut work = 0;
        while !self.gc.gray.is_empty() {
            work += self.propagate_mark();
        }
        work
    }

    /// Mark every reference of an object without weak semantics
    fn mark_refs(&mut self, id: GcId) -> usize {
        let mut refs = std::mem::take(&mut self.gc.scratch);
        refs.clear();
        self.pool[id].body.collect_refs(&mut refs);
        let n = refs.len();
        for &r in &refs {
            self.mark_object(r);
        }
        self.gc.scratch = refs;
        n
    }

    /// Closures and prototypes: everything they hold is strong
    fn traverse_strong(&mut self, id: GcId) -> usize {
        1 + self.mark_refs(id)
    }

    fn traverse_userdata(&mut self, id: GcId) -> usize {
        let n = self.mark_refs(id);
        self.gen_link(id);
        1 + n
    }

    /// A traversed object touched in this cycle returns to `grayagain`;
    /// one touched in the previous cycle becomes plain old.
    pub(crate) fn gen_link(&mut self, id: GcId) {
        debug_assert!(self.header(id).is_black());
        match self.header(id).age() {
            GcAge::Touched1 => {
                self.header_mut(id).make_gray();
                self.gc.grayagain.push(id);
            }
            GcAge::Touched2 => self.header_mut(id).change_age(GcAge::Touched2, GcAge::Old),
            _ => {}
        }
    }

    // ============ Tables ============

    /// Metatable and weakness of a table, from the `__mode` field
    pub(crate) fn weak_mode(&self, id: GcId) -> (Option<GcId>, bool, bool) {
        let Some(mt) = self.pool[id].as_table().and_then(|t| t.metatable()) else {
            return (None, false, false);
        };
        let mode = self.pool[mt]
            .as_table()
            .map(|m| m.raw_get(&LuaValue::String(self.tm_mode)))
            .unwrap_or_default();
        match mode {
            LuaValue::String(s) => match self.pool[s].as_string() {
                Some(ls) => {
                    let text = ls.as_str();
                    (Some(mt), text.contains('k'), text.contains('v'))
                }
                None => (Some(mt), false, false),
            },
            _ => (Some(mt), false, false),
        }
    }

    fn traverse_table(&mut self, id: GcId) -> usize {
        let (mt, weak_keys, weak_values) = self.weak_mode(id);
        self.mark_object_opt(mt);
        match (weak_keys, weak_values) {
            (false, false) => {
                self.mark_refs(id);
                self.gen_link(id);
            }
            (false, true) => self.traverse_weak_value(id),
            (true, false) => {
                self.traverse_ephemeron(id, false);
            }
            (true, true) => {
                self.header_mut(id).make_gray();
                self.gc.allweak.push(id);
            }
        }
        let t = self.pool[id].as_table();
        1 + t.map_or(0, |t| t.array.len() + 2 * t.hash.len())
    }

    /// Whether a key or value may be removed from a weak table. Strings are
    /// values and are marked instead.
    pub(crate) fn is_cleared(&mut self, v: LuaValue) -> bool {
        match v {
            LuaValue::String(id) => {
                self.mark_object(id);
                false
            }
            other => other.as_gc_id().is_some_and(|id| self.header(id).is_white()),
        }
    }

    #[inline]
    fn value_is_white(&self, v: &LuaValue) -> bool {
        v.as_gc_id().is_some_and(|id| self.header(id).is_white())
    }

    /// Strong keys, weak values: mark keys, defer the values
    fn traverse_weak_value(&mut self, id: GcId) {
        let Some(table) = self.pool[id].as_table_mut() else {
            return;
        };
        let hash = std::mem::take(&mut table.hash);
        let mut has_clears = !table.array.is_empty();
        for (k, v) in hash.iter() {
            self.mark_value(*k);
            if !has_clears && self.is_cleared(*v) {
                has_clears = true;
            }
        }
        if let Some(table) = self.pool[id].as_table_mut() {
            table.hash = hash;
        }
        self.header_mut(id).make_gray();
        if self.gc.gc_state == GcState::Atomic && has_clears {
            self.gc.weak.push(id);
        } else {
            self.gc.grayagain.push(id);
        }
    }

    /// Weak keys, strong values: mark values whose key is already marked.
    /// Returns whether anything was marked. `inv` walks the hash part
    /// backwards.
    pub(crate) fn traverse_ephemeron(&mut self, id: GcId, inv: bool) -> bool {
        let Some(table) = self.pool[id].as_table_mut() else {
            return false;
        };
        let hash = std::mem::take(&mut table.hash);
        let array = std::mem::take(&mut table.array);
        let mut marked = false;
        let mut has_clears = false;
        let mut has_white_white = false;

        for v in array.iter() {
            if self.value_is_white(v) {
                marked = true;
                self.mark_value(*v);
            }
        }
        let n = hash.len();
        for i in 0..n {
            let idx = if inv { n - 1 - i } else { i };
            let Some((k, v)) = hash.get_index(idx) else {
                continue;
            };
            if self.is_cleared(*k) {
                has_clears = true;
                if self.value_is_white(v) {
                    has_white_white = true;
                }
            } else if self.value_is_white(v) {
                marked = true;
                self.mark_value(*v);
            }
        }

        if let Some(table) = self.pool[id].as_table_mut() {
            table.hash = hash;
            table.array = array;
        }

        if self.gc.gc_state == GcState::Propagate {
            self.header_mut(id).make_gray();
            self.gc.grayagain.push(id);
        } else if has_white_white {
            self.header_mut(id).make_gray();
            self.gc.ephemeron.push(id);
        } else if has_clears {
            self.header_mut(id).make_gray();
            self.gc.allweak.push(id);
        } else {
            self.gen_link(id);
        }
        marked
    }

    // ============ Threads ============

    fn traverse_thread(&mut self, id: GcId) -> usize {
        let state = self.gc.gc_state;
        if self.header(id).is_old() || state == GcState::Propagate {
            self.header_mut(id).make_gray();
            self.gc.grayagain.push(id);
        }
        let Some(th) = self.pool[id].as_thread() else {
            return 1;
        };
        if !th.is_built() {
            return 1;
        }
        let size = th.stack_size();
        self.mark_refs(id);

        if state == GcState::Atomic {
            let th = self.pool[id].as_thread_mut();
            let relink = match th {
                Some(th) => {
                    let top = th.top;
                    if let Some(stack) = th.stack.as_mut() {
                        stack[top..].fill(LuaValue::Nil);
                    }
                    let relink = !th.in_twups && !th.open_upvalues.is_empty();
                    if relink {
                        th.in_twups = true;
                    }
                    relink
                }
                None => false,
            };
            if relink {
                self.gc.twups.push(id);
            }
        } else if !self.gc.gc_emergency {
            self.shrink_stack(id);
        }
        1 + size
    }

    /// Release stack space far above what the thread uses
    fn shrink_stack(&mut self, id: GcId) {
        let Some(th) = self.pool[id].as_thread_mut() else {
            return;
        };
        let in_use = (th.top + 1).max(LUA_MINSTACK);
        let max = if in_use > LUAI_MAXSTACK / 3 {
            LUAI_MAXSTACK
        } else {
            in_use * 3
        };
        let size = th.stack_size();
        if in_use <= LUAI_MAXSTACK && size > max {
            let new_len = if in_use > LUAI_MAXSTACK / 2 {
                LUAI_MAXSTACK
            } else {
                in_use * 2
            };
            if let Some(stack) = th.stack.as_mut() {
                stack.truncate(new_len);
                stack.shrink_to_fit();
            }
            let new_size = self.pool[id].body.mem_size();
            self.shrink_object(id, new_size);
        }
    }
}
