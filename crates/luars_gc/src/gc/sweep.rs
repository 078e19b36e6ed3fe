// Sweeper
//
// Walks one list at a time in bounded batches. Objects carrying the old
// white are unlinked and destroyed; survivors are repainted with the new
// white (and age New) for the next cycle.
use tracing::debug;

use super::gc_limits::{GC_SWEEPMAX, MINSTRTABSIZE};
use super::{GcBody, GcId, GcList, GcState, Link};
use crate::lua_heap::LuaHeap;
use crate::lua_value::LuaUpvalue;

impl LuaHeap {
    /// Sweep at most `count` objects starting at `p`. Returns the position
    /// to resume from (`None` at the end of the list) and how many objects
    /// were visited.
    pub(crate) fn sweep_list(&mut self, mut p: Link, count: usize) -> (Option<Link>, usize) {
        let other_white = self.gc.other_white();
        let white = self.gc.current_white;
        let mut i = 0;
        while i < count {
            let Some(curr) = self.get_link(p) else {
                break;
            };
            if self.header(curr).is_dead(other_white) {
                let next = self.pool[curr].next;
                self.set_link(p, next);
                self.free_object(curr);
            } else {
                self.header_mut(curr).reset_to_white(white);
                p = Link::Next(curr);
            }
            i += 1;
        }
        let resume = self.get_link(p).map(|_| p);
        (resume, i)
    }

    /// Sweep until at least one object survives, returning the position
    /// after it
    pub(crate) fn sweep_to_live(&mut self, p: Link) -> Option<Link> {
        loop {
            match self.sweep_list(p, 1) {
                (Some(next), _) if next == p => continue,
                (next, _) => return next,
            }
        }
    }

    pub(crate) fn enter_sweep(&mut self) {
        self.gc.gc_state = GcState::SwpAllGc;
        self.gc.sweepgc = self.sweep_to_live(Link::Head(GcList::AllGc));
    }

    /// One batch of the current sweep, or move on to `next_state` and
    /// `next_list` once the current list is exhausted
    pub(crate) fn sweep_step(&mut self, next_state: GcState, next_list: Option<GcList>) -> usize {
        match self.gc.sweepgc {
            Some(p) => {
                let old_debt = self.gc.gc_debt;
                let (resume, count) = self.sweep_list(p, GC_SWEEPMAX);
                self.gc.sweepgc = resume;
                self.adjust_estimate(self.gc.gc_debt - old_debt);
                count
            }
            None => {
                self.gc.gc_state = next_state;
                self.gc.sweepgc = next_list.map(Link::Head);
                0
            }
        }
    }

    pub(crate) fn adjust_estimate(&mut self, delta: isize) {
        self.gc.gc_estimate = (self.gc.gc_estimate as isize + delta).max(0) as usize;
    }

    /// Size maintenance at the end of a cycle: shrink a mostly empty string
    /// table. Skipped in emergency collections.
    pub(crate) fn check_sizes(&mut self) {
        if self.gc.gc_emergency {
            return;
        }
        let size = self.strings.size();
        if self.strings.nuse() < size / 4 && size / 2 >= MINSTRTABSIZE {
            let old_debt = self.gc.gc_debt;
            // Shrinking never fails
            let _ = self.resize_string_table(size / 2);
            self.adjust_estimate(self.gc.gc_debt - old_debt);
            debug!(target: "luars_gc", from = size, to = size / 2, "string table shrunk");
        }
        self.pool.shrink_to_fit();
    }

    /// Keep the generational cursors valid when `o` leaves `allgc`
    pub(crate) fn correct_pointers(&mut self, o: GcId) {
        let next = self.pool[o].next;
        let gc = &mut self.gc;
        for cursor in [&mut gc.survival, &mut gc.old1, &mut gc.reallyold, &mut gc.firstold1] {
            if *cursor == Some(o) {
                *cursor = next;
            }
        }
    }

    // ============ Destruction ============

    /// Remove an already unlinked object from the arena and release its memory
    pub(crate) fn free_object(&mut self, id: GcId) {
        let Some(obj) = self.pool.free(id) else {
            return;
        };
        let size = obj.header.size;
        match obj.body {
            GcBody::String(s) => {
                if s.is_short() {
                    self.strings.remove(id, s.hash());
                }
            }
            GcBody::Upvalue(LuaUpvalue::Open { thread, .. }) => {
                if let Some(th) = self.pool.get_mut(thread).and_then(|o| o.as_thread_mut()) {
                    th.open_upvalues.retain(|&uv| uv != id);
                }
            }
            GcBody::Thread(th) => {
                if th.in_twups {
                    self.gc.twups.retain(|&t| t != id);
                }
                if !self.gc.gc_closing {
                    for uv in th.open_upvalues.iter().copied() {
                        let level = match self.pool.get(uv).and_then(|o| o.as_upvalue()) {
                            Some(LuaUpvalue::Open { level, .. }) => *level,
                            _ => continue,
                        };
                        self.close_one_upvalue(uv, th.get_slot(level));
                    }
                }
            }
            _ => {}
        }
        self.mem_free(size);
        self.gc.stats.objects_collected += 1;
        self.gc.stats.bytes_freed += size;
    }
}
