// Incremental pacer
//
// Allocation raises `gc_debt`; at a checkpoint with positive debt the
// collector converts it into work units (scaled by the step multiplier)
// and runs single steps until the budget is spent or the cycle ends. At
// the end of a cycle the next threshold is a percentage (`pause`) of the
// live estimate.
use tracing::{debug, warn};

use super::gc_limits::{GC_FINALIZECOST, GC_FINMAX, GC_STOPPED_DEBT, PAUSEADJ, WORK2MEM};
use super::{GcKind, GcList, GcState, MAX_LMEM};
use crate::lua_heap::LuaHeap;

impl LuaHeap {
    /// Advance the state machine by one step, returning the work done
    pub(crate) fn single_step(&mut self) -> usize {
        debug_assert!(!self.gc.gc_stopem, "collector is not reentrant");
        self.gc.gc_stopem = true;
        let work = match self.gc.gc_state {
            GcState::Pause => {
                self.gc.stats.cycles += 1;
                debug!(target: "luars_gc", bytes = self.gc.total_bytes(), "cycle started");
                self.restart_collection();
                self.gc.gc_state = GcState::Propagate;
                1
            }
            GcState::Propagate => {
                if self.gc.gray.is_empty() {
                    self.gc.gc_state = GcState::EnterAtomic;
                    0
                } else {
                    self.propagate_mark()
                }
            }
            GcState::EnterAtomic => {
                let work = self.atomic();
                self.enter_sweep();
                self.gc.gc_estimate = self.gc.total_bytes().max(0) as usize;
                work
            }
            // Only observable from inside 'atomic'
            GcState::Atomic => 0,
            GcState::SwpAllGc => self.sweep_step(GcState::SwpFinObj, Some(GcList::FinObj)),
            GcState::SwpFinObj => self.sweep_step(GcState::SwpToBeFnz, Some(GcList::ToBeFnz)),
            GcState::SwpToBeFnz => self.sweep_step(GcState::SwpEnd, None),
            GcState::SwpEnd => {
                self.check_sizes();
                self.gc.gc_state = GcState::CallFin;
                debug!(target: "luars_gc", estimate = self.gc.gc_estimate, "sweep finished");
                0
            }
            GcState::CallFin => {
                if self.gc.tobefnz.is_some() && !self.gc.gc_emergency {
                    // Finalizers may allocate and collect
                    self.gc.gc_stopem = false;
                    self.run_a_few_finalizers(GC_FINMAX) * GC_FINALIZECOST
                } else {
                    self.gc.gc_state = GcState::Pause;
                    0
                }
            }
        };
        self.gc.gc_stopem = false;
        work
    }

    pub(crate) fn run_until_state(&mut self, state: GcState) {
        while self.gc.gc_state != state {
            self.single_step();
        }
    }

    /// Next cycle starts once memory reaches `pause`% of the live estimate
    pub(crate) fn set_pause_threshold(&mut self) {
        let pause = self.gc.params.pause as isize;
        let estimate = (self.gc.gc_estimate / PAUSEADJ) as isize;
        debug_assert!(estimate > 0);
        let threshold = if estimate > 0 && pause < MAX_LMEM / estimate {
            estimate * pause
        } else if estimate == 0 {
            0
        } else {
            MAX_LMEM
        };
        let debt = (self.gc.total_bytes() - threshold).min(0);
        self.gc.set_debt(debt);
    }

    fn inc_step(&mut self) {
        let step_mul = (self.gc.params.step_mul | 1) as isize;
        let mut debt = (self.gc.gc_debt / WORK2MEM).saturating_mul(step_mul);
        let step_size = if self.gc.params.step_size <= isize::BITS - 2 {
            ((1isize << self.gc.params.step_size) / WORK2MEM).saturating_mul(step_mul)
        } else {
            MAX_LMEM
        };
        loop {
            let work = self.single_step();
            debt = debt.saturating_sub(work as isize);
            if debt <= -step_size || self.gc.gc_state == GcState::Pause {
                break;
            }
        }
        if self.gc.gc_state == GcState::Pause {
            self.set_pause_threshold();
        } else {
            let debt = (debt / step_mul).saturating_mul(WORK2MEM);
            self.gc.set_debt(debt);
        }
    }

    /// Collector entry point once debt is positive
    pub(crate) fn gc_step(&mut self) {
        if !self.gc.is_running() {
            self.gc.set_debt(GC_STOPPED_DEBT);
        } else if self.gc.is_generational_mode() {
            self.gen_step();
        } else {
            self.inc_step();
        }
    }

    /// Checkpoint: run collector work if allocation has created debt.
    /// Hosts call this at points where every live object is rooted.
    pub fn check_gc(&mut self) {
        if self.gc.gc_debt > 0 {
            self.gc_step();
        }
    }

    /// Finish any cycle in progress and run a complete one
    fn full_inc(&mut self) {
        if self.gc.keep_invariant() {
            // Sweep everything back to white
            self.enter_sweep();
        }
        self.run_until_state(GcState::Pause);
        self.run_until_state(GcState::CallFin);
        debug_assert_eq!(self.gc.gc_estimate as isize, self.gc.total_bytes());
        self.run_until_state(GcState::Pause);
        self.set_pause_threshold();
    }

    /// Full collection. An emergency collection neither runs finalizers nor
    /// resizes the string table.
    pub(crate) fn full_gc(&mut self, emergency: bool) {
        debug_assert!(!self.gc.gc_emergency);
        self.gc.gc_emergency = emergency;
        if emergency {
            self.gc.stats.emergency_collections += 1;
            warn!(target: "luars_gc", bytes = self.gc.total_bytes(), "emergency collection");
        }
        match self.gc.gc_kind {
            GcKind::Incremental => self.full_inc(),
            GcKind::Generational => {
                self.full_gen();
            }
        }
        self.gc.gc_emergency = false;
    }
}
