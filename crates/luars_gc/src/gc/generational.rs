// Generational mode
//
// Minor collections only traverse young objects plus old objects that may
// point to them (Old1 objects and touched ones). `allgc` is split by cursors:
//
//   allgc -> [new] -> survival -> [survival] -> old1 -> [old1] -> reallyold -> [old]
//
// `finobj` is split the same way by the finobj* cursors. Survivors advance
// one age per minor collection.
//
// A major collection runs when memory grows past `gen_major_mul`% of the
// base left by the previous one. When it frees less than half of that
// growth it is a bad collection: the collector keeps doing full
// incremental-style cycles until one traverses fewer objects than 9/8 of
// the bad one.
use tracing::{debug, info};

use super::{GcAge, GcId, GcKind, GcList, GcObjectKind, GcState, Link};
use crate::lua_heap::LuaHeap;

impl LuaHeap {
    /// Sweep young objects from `p` up to `limit`, freeing dead ones and
    /// aging survivors. Returns the position after the last survivor.
    fn sweep_gen(&mut self, mut p: Link, limit: Option<GcId>, first_old1: &mut Option<GcId>) -> Link {
        let white = self.gc.current_white;
        loop {
            let curr = self.get_link(p);
            if curr == limit {
                break;
            }
            let Some(curr) = curr else {
                break;
            };
            if self.header(curr).is_white() {
                debug_assert!(!self.header(curr).is_old());
                let next = self.pool[curr].next;
                self.set_link(p, next);
                self.free_object(curr);
            } else {
                let header = self.header_mut(curr);
                if header.age() == GcAge::New {
                    header.reset_to_survival(white);
                } else {
                    let age = header.age().next_age();
                    header.set_age(age);
                    if age == GcAge::Old1 && first_old1.is_none() {
                        *first_old1 = Some(curr);
                    }
                }
                p = Link::Next(curr);
            }
        }
        p
    }

    /// Paint a whole list with the current white and age New
    fn white_list(&mut self, mut p: Option<GcId>) {
        let white = self.gc.current_white;
        while let Some(id) = p {
            self.header_mut(id).reset_to_white(white);
            p = self.pool[id].next;
        }
    }

    /// Old1 objects become old; black ones are traversed again since they
    /// may point to objects that just became old too
    fn mark_old(&mut self, from: Option<GcId>, to: Option<GcId>) {
        let mut p = from;
        while p != to {
            let Some(id) = p else {
                break;
            };
            if self.header(id).age() == GcAge::Old1 {
                debug_assert!(!self.header(id).is_white());
                self.header_mut(id).change_age(GcAge::Old1, GcAge::Old);
                if self.header(id).is_black() {
                    self.really_mark_object(id);
                }
            }
            p = self.pool[id].next;
        }
    }

    /// Rebuild `grayagain` after a minor collection: keep threads and
    /// objects touched in this cycle, drop the rest
    fn correct_gray_lists(&mut self) {
        let mut list = std::mem::take(&mut self.gc.grayagain);
        list.append(&mut self.gc.weak);
        list.append(&mut self.gc.allweak);
        list.append(&mut self.gc.ephemeron);
        let mut kept = Vec::with_capacity(list.len());
        for id in list {
            let kind = self.pool[id].kind();
            let header = self.header_mut(id);
            if header.is_white() {
                continue;
            }
            match header.age() {
                GcAge::Touched1 => {
                    // Black again, for the next barrier
                    header.nw2black();
                    header.change_age(GcAge::Touched1, GcAge::Touched2);
                    kept.push(id);
                }
                _ if kind == GcObjectKind::Thread => kept.push(id),
                age => {
                    debug_assert!(age.is_old());
                    if age == GcAge::Touched2 {
                        header.change_age(GcAge::Touched2, GcAge::Old);
                    }
                    header.nw2black();
                }
            }
        }
        self.gc.grayagain = kept;
    }

    fn finish_gen_cycle(&mut self) {
        self.correct_gray_lists();
        self.check_sizes();
        // Skip restart, minor collections start in propagate
        self.gc.gc_state = GcState::Propagate;
        if !self.gc.gc_emergency {
            self.call_all_pending_finalizers();
        }
    }

    fn young_collection(&mut self) {
        debug_assert_eq!(self.gc.gc_state, GcState::Propagate);
        self.gc.stats.minor_collections += 1;
        if self.gc.firstold1.is_some() {
            self.mark_old(self.gc.firstold1, self.gc.reallyold);
            self.gc.firstold1 = None;
        }
        self.mark_old(self.gc.finobj, self.gc.finobjrold);
        self.mark_old(self.gc.tobefnz, None);
        self.atomic();

        // Sweep the nursery, then the survivals
        self.gc.gc_state = GcState::SwpAllGc;
        let mut first_old1 = None;
        let psurvival = self.sweep_gen(Link::Head(GcList::AllGc), self.gc.survival, &mut first_old1);
        self.sweep_gen(psurvival, self.gc.old1, &mut first_old1);
        self.gc.reallyold = self.gc.old1;
        self.gc.old1 = self.get_link(psurvival);
        self.gc.survival = self.gc.allgc;
        self.gc.firstold1 = first_old1;

        // No Old1 shortcut for the finalizable lists
        let mut dummy = None;
        let psurvival = self.sweep_gen(Link::Head(GcList::FinObj), self.gc.finobjsur, &mut dummy);
        self.sweep_gen(psurvival, self.gc.finobjold1, &mut dummy);
        self.gc.finobjrold = self.gc.finobjold1;
        self.gc.finobjold1 = self.get_link(psurvival);
        self.gc.finobjsur = self.gc.finobj;

        self.sweep_gen(Link::Head(GcList::ToBeFnz), None, &mut dummy);
        debug!(target: "luars_gc", bytes = self.gc.total_bytes(), "minor collection finished");
        self.finish_gen_cycle();
    }

    /// Every survivor becomes old. Threads stay gray in `grayagain` and open
    /// upvalues stay gray; everything else is black.
    fn sweep_to_old(&mut self, mut p: Link) {
        while let Some(curr) = self.get_link(p) {
            if self.header(curr).is_white() {
                let next = self.pool[curr].next;
                self.set_link(p, next);
                self.free_object(curr);
                continue;
            }
            let open_upvalue = self.pool[curr].as_upvalue().is_some_and(|uv| uv.is_open());
            let is_thread = self.pool[curr].kind() == GcObjectKind::Thread;
            let header = self.header_mut(curr);
            header.set_age(GcAge::Old);
            if is_thread {
                header.make_gray();
                self.gc.grayagain.push(curr);
            } else if open_upvalue {
                header.make_gray();
            } else {
                header.nw2black();
            }
            p = Link::Next(curr);
        }
    }

    fn atomic_to_gen(&mut self) {
        self.gc.clear_gray_lists();
        self.gc.gc_state = GcState::SwpAllGc;
        self.sweep_to_old(Link::Head(GcList::AllGc));
        self.gc.reallyold = self.gc.allgc;
        self.gc.old1 = self.gc.allgc;
        self.gc.survival = self.gc.allgc;
        self.gc.firstold1 = None;

        self.sweep_to_old(Link::Head(GcList::FinObj));
        self.gc.finobjrold = self.gc.finobj;
        self.gc.finobjold1 = self.gc.finobj;
        self.gc.finobjsur = self.gc.finobj;

        self.sweep_to_old(Link::Head(GcList::ToBeFnz));

        self.gc.gc_kind = GcKind::Generational;
        self.gc.last_atomic = 0;
        self.gc.gc_estimate = self.gc.total_bytes().max(0) as usize;
        self.finish_gen_cycle();
    }

    /// Next minor collection after memory grows `gen_minor_mul`%
    fn set_minor_debt(&mut self) {
        let total = self.gc.total_bytes();
        let minor_mul = self.gc.params.gen_minor_mul as isize;
        self.gc.set_debt(-(total / 100).saturating_mul(minor_mul));
    }

    /// Complete a cycle and make every survivor old. Returns the number of
    /// objects traversed by the atomic step.
    fn enter_gen(&mut self) -> usize {
        self.run_until_state(GcState::Pause);
        self.run_until_state(GcState::Propagate);
        let traversed = self.atomic();
        self.atomic_to_gen();
        self.set_minor_debt();
        traversed
    }

    fn enter_inc(&mut self) {
        self.white_list(self.gc.allgc);
        self.gc.reallyold = None;
        self.gc.old1 = None;
        self.gc.survival = None;
        self.gc.firstold1 = None;
        self.white_list(self.gc.finobj);
        self.white_list(self.gc.tobefnz);
        self.gc.finobjrold = None;
        self.gc.finobjold1 = None;
        self.gc.finobjsur = None;
        self.gc.clear_gray_lists();
        self.gc.gc_state = GcState::Pause;
        self.gc.gc_kind = GcKind::Incremental;
        self.gc.last_atomic = 0;
    }

    pub(crate) fn change_mode(&mut self, new_mode: GcKind) {
        if new_mode != self.gc.gc_kind {
            match new_mode {
                GcKind::Generational => {
                    self.enter_gen();
                }
                GcKind::Incremental => self.enter_inc(),
            }
            info!(target: "luars_gc", mode = ?new_mode, "collector mode changed");
        }
        self.gc.last_atomic = 0;
    }

    /// Major collection in generational mode
    pub(crate) fn full_gen(&mut self) -> usize {
        self.gc.stats.major_collections += 1;
        self.enter_inc();
        self.enter_gen()
    }

    /// A full cycle while recovering from a bad major collection. Returns
    /// to generational mode once a cycle looks good.
    fn step_gen_full(&mut self) {
        self.gc.stats.major_collections += 1;
        let last_atomic = self.gc.last_atomic;
        if self.gc.gc_kind == GcKind::Generational {
            self.enter_inc();
        }
        self.run_until_state(GcState::Propagate);
        let new_atomic = self.atomic();
        if new_atomic < last_atomic + (last_atomic >> 3) {
            self.atomic_to_gen();
            self.set_minor_debt();
            info!(target: "luars_gc", traversed = new_atomic, "good collection, back to generational mode");
        } else {
            self.gc.gc_estimate = self.gc.total_bytes().max(0) as usize;
            self.enter_sweep();
            self.run_until_state(GcState::Pause);
            self.set_pause_threshold();
            self.gc.last_atomic = new_atomic;
        }
    }

    pub(crate) fn gen_step(&mut self) {
        if self.gc.last_atomic != 0 {
            self.step_gen_full();
            return;
        }
        let major_base = self.gc.gc_estimate;
        let major_inc = (major_base / 100).saturating_mul(self.gc.params.gen_major_mul as usize);
        let total = self.gc.total_bytes().max(0) as usize;
        if self.gc.gc_debt > 0 && total > major_base + major_inc {
            let traversed = self.full_gen();
            let total = self.gc.total_bytes().max(0) as usize;
            if total >= major_base + major_inc / 2 {
                // Bad collection, wait longer for the next major one
                self.gc.last_atomic = traversed;
                self.set_pause_threshold();
                info!(target: "luars_gc", traversed, bytes = total, "bad major collection");
            }
        } else {
            self.young_collection();
            self.set_minor_debt();
            self.gc.gc_estimate = major_base;
        }
    }
}
