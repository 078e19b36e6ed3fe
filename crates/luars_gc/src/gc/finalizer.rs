// Finalizers
//
// An object whose metatable has a `__gc` field when it is set moves from
// `allgc` to `finobj`. The atomic step moves unreachable ones to `tobefnz`;
// from there each goes back to `allgc` as a normal object right before its
// finalizer runs, so a second death frees it for good.
//
// Finalizers run with collector steps disabled. Errors are turned into
// warnings and never reach the collector.
use super::{GcAge, GcId, GcList, Link};
use crate::lua_heap::{LuaError, LuaHeap, LuaResult};
use crate::lua_value::LuaValue;

impl LuaHeap {
    /// Metamethod `event` (an interned key) of a value
    pub(crate) fn get_metamethod(&self, v: LuaValue, event: GcId) -> LuaValue {
        match self.get_metatable(v) {
            Some(mt) => self.table_get(mt, LuaValue::String(event)),
            None => LuaValue::Nil,
        }
    }

    /// Move `o` to `finobj` if its new metatable `mt` declares a finalizer
    pub(crate) fn check_finalizer(&mut self, o: GcId, mt: GcId) {
        if self.header(o).to_finalize()
            || self.table_get(mt, LuaValue::String(self.tm_gc)).is_nil()
            || self.gc.gc_closing
        {
            return;
        }
        if self.gc.is_sweep_phase() {
            // Sweep it by hand so it stays alive
            let white = self.gc.current_white;
            self.header_mut(o).make_white(white);
            if self.gc.sweepgc == Some(Link::Next(o)) {
                self.gc.sweepgc = self.sweep_to_live(Link::Next(o));
            }
        } else {
            self.correct_pointers(o);
        }
        let Some(link) = self.find_link(Link::Head(GcList::AllGc), o) else {
            return;
        };
        let next = self.pool[o].next;
        self.set_link(link, next);
        self.pool[o].next = self.gc.finobj;
        self.gc.finobj = Some(o);
        self.header_mut(o).set_finalized();
    }

    /// Take the first object of `tobefnz` and return it to `allgc`
    fn udata_to_finalize(&mut self) -> Option<GcId> {
        let o = self.gc.tobefnz?;
        debug_assert!(self.header(o).to_finalize());
        self.gc.tobefnz = self.pool[o].next;
        self.pool[o].next = self.gc.allgc;
        self.gc.allgc = Some(o);
        let white = self.gc.current_white;
        self.header_mut(o).clear_finalized();
        if self.gc.is_sweep_phase() {
            self.header_mut(o).make_white(white);
        } else if self.header(o).age() == GcAge::Old1 {
            self.gc.firstold1 = Some(o);
        }
        Some(o)
    }

    /// Run the finalizer of the first pending object
    fn call_one_finalizer(&mut self) {
        debug_assert!(!self.gc.gc_emergency);
        let Some(o) = self.udata_to_finalize() else {
            return;
        };
        let Some(obj) = self.pool[o].to_value(o) else {
            return;
        };
        let tm = self.get_metamethod(obj, self.tm_gc);
        if tm.is_nil() {
            return;
        }
        let old_stop = self.gc.gc_stop_fin;
        self.gc.gc_stop_fin = true;
        let result = self.call_finalizer(tm, obj);
        self.gc.gc_stop_fin = old_stop;
        self.gc.stats.finalizers_run += 1;
        if let Err(e) = result {
            self.gc.stats.finalizer_errors += 1;
            self.warn(&format!("error in __gc ({e})"));
        }
    }

    /// Call `tm(obj)` with both anchored on the running thread's stack
    fn call_finalizer(&mut self, tm: LuaValue, obj: LuaValue) -> LuaResult<()> {
        let th = self.running;
        let saved_top = self.thread(th).map_or(0, |t| t.top());
        let result = self
            .push(th, tm)
            .and_then(|_| self.push(th, obj))
            .and_then(|_| self.call_value(tm, &[obj]));
        self.close_upvalues(th, saved_top);
        if let Some(thread) = self.pool.get_mut(th).and_then(|o| o.as_thread_mut()) {
            thread.top = thread.top.min(saved_top);
        }
        result
    }

    /// Call a function value: native closures directly, Lua closures through
    /// the installed interpreter
    pub fn call_value(&mut self, func: LuaValue, args: &[LuaValue]) -> LuaResult<()> {
        let LuaValue::Function(id) = func else {
            return Err(LuaError::NotCallable(func.type_name()));
        };
        if let Some(native) = self.native_closure(id) {
            let f = native.func();
            return f(self, args);
        }
        let mut caller = self.caller.take().ok_or(LuaError::NoCaller)?;
        let result = caller.call(self, func, args);
        if self.caller.is_none() {
            self.caller = Some(caller);
        }
        result
    }

    /// Run up to `n` pending finalizers, returning how many ran
    pub(crate) fn run_a_few_finalizers(&mut self, n: usize) -> usize {
        let mut i = 0;
        while i < n && self.gc.tobefnz.is_some() {
            self.call_one_finalizer();
            i += 1;
        }
        i
    }

    pub(crate) fn call_all_pending_finalizers(&mut self) {
        while self.gc.tobefnz.is_some() {
            self.call_one_finalizer();
        }
    }

    /// Number of objects whose finalizer is pending
    pub fn pending_finalizers(&self) -> usize {
        self.list_len(GcList::ToBeFnz)
    }
}
