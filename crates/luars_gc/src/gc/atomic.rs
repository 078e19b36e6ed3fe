// Atomic step
//
// Runs without interruption once propagation has drained `gray`:
// 1. re-mark the running thread, registry and type metatables
// 2. remark upvalues of unmarked threads, then drain `grayagain`
// 3. converge ephemerons and clear dead weak values
// 4. move unreachable finalizable objects to `tobefnz` and resurrect them
// 5. converge again, clear dead keys and the values of resurrected tables
// 6. flip the current white
use tracing::debug;

use super::{GcId, GcList, GcState, Link};
use crate::lua_heap::LuaHeap;
use crate::lua_value::LuaValue;

impl LuaHeap {
    /// Finish marking. Returns the number of objects traversed.
    pub(crate) fn atomic(&mut self) -> usize {
        let mut work = 0;
        let grayagain = std::mem::take(&mut self.gc.grayagain);
        debug_assert!(self.gc.ephemeron.is_empty() && self.gc.weak.is_empty());
        debug_assert!(!self.header(self.main_thread).is_white());
        self.gc.gc_state = GcState::Atomic;

        self.mark_object(self.running);
        // The host may have changed these since they were first marked
        self.mark_value(self.registry);
        self.mark_metatables();
        work += self.propagate_all();
        work += self.remark_upvalues();
        work += self.propagate_all();
        self.gc.gray = grayagain;
        work += self.propagate_all();
        self.converge_ephemerons();

        // Every strongly reachable object is marked now
        let weak = std::mem::take(&mut self.gc.weak);
        self.clear_by_values(&weak);
        self.gc.weak = weak;
        let allweak = std::mem::take(&mut self.gc.allweak);
        self.clear_by_values(&allweak);
        self.gc.allweak = allweak;
        let orig_weak = self.gc.weak.len();
        let orig_all = self.gc.allweak.len();

        self.separate_tobefnz(false);
        work += self.mark_being_finalized();
        work += self.propagate_all();
        self.converge_ephemerons();

        // Resurrected objects are marked now
        let ephemeron = std::mem::take(&mut self.gc.ephemeron);
        self.clear_by_keys(&ephemeron);
        self.gc.ephemeron = ephemeron;
        let allweak = std::mem::take(&mut self.gc.allweak);
        self.clear_by_keys(&allweak);
        self.clear_by_values(&allweak[orig_all..]);
        self.gc.allweak = allweak;
        let weak = std::mem::take(&mut self.gc.weak);
        self.clear_by_values(&weak[orig_weak..]);
        self.gc.weak = weak;

        self.gc.current_white = self.gc.other_white();
        debug_assert!(self.gc.gray.is_empty());
        debug!(target: "luars_gc", work, "atomic step finished");
        work
    }

    /// Mark ephemeron values until no pass marks anything new, alternating
    /// the scan direction so chains converge in few passes.
    pub(crate) fn converge_ephemerons(&mut self) {
        let mut dir = false;
        loop {
            let list = std::mem::take(&mut self.gc.ephemeron);
            let mut changed = false;
            for id in list {
                // Out of the list for now, traversal may link it back
                self.header_mut(id).nw2black();
                if self.traverse_ephemeron(id, dir) {
                    self.propagate_all();
                    changed = true;
                }
            }
            dir = !dir;
            if !changed {
                break;
            }
        }
    }

    /// Remove entries with unmarked keys
    fn clear_by_keys(&mut self, list: &[GcId]) {
        for &id in list {
            let Some(table) = self.pool[id].as_table_mut() else {
                continue;
            };
            let mut hash = std::mem::take(&mut table.hash);
            hash.retain(|k, _| !self.is_cleared(*k));
            if let Some(table) = self.pool[id].as_table_mut() {
                table.hash = hash;
            }
        }
    }

    /// Remove entries with unmarked values
    fn clear_by_values(&mut self, list: &[GcId]) {
        for &id in list {
            let Some(table) = self.pool[id].as_table_mut() else {
                continue;
            };
            let mut hash = std::mem::take(&mut table.hash);
            let mut array = std::mem::take(&mut table.array);
            for v in array.iter_mut() {
                if self.is_cleared(*v) {
                    *v = LuaValue::Nil;
                }
            }
            hash.retain(|_, v| !self.is_cleared(*v));
            if let Some(table) = self.pool[id].as_table_mut() {
                table.hash = hash;
                table.array = array;
            }
        }
    }

    /// Move unreachable objects (or all of them) from `finobj` to the end of
    /// `tobefnz`. Old finalizable objects are not examined.
    pub(crate) fn separate_tobefnz(&mut self, all: bool) {
        let mut p = Link::Head(GcList::FinObj);
        let mut last_next = self.find_last(Link::Head(GcList::ToBeFnz));
        loop {
            let curr = self.get_link(p);
            if curr == self.gc.finobjold1 {
                break;
            }
            let Some(curr) = curr else {
                break;
            };
            debug_assert!(self.header(curr).to_finalize());
            if !(self.header(curr).is_white() || all) {
                p = Link::Next(curr);
                continue;
            }
            let next = self.pool[curr].next;
            if Some(curr) == self.gc.finobjsur {
                self.gc.finobjsur = next;
            }
            self.set_link(p, next);
            self.pool[curr].next = None;
            self.set_link(last_next, Some(curr));
            last_next = Link::Next(curr);
        }
    }
}
