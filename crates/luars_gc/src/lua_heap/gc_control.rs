// Host control of the collector: stop/restart, explicit collections and
// steps, mode switches and tuning parameters.
use super::LuaHeap;
use crate::gc::{GcKind, GcParams, GcState, GcStats};

impl LuaHeap {
    /// Stop automatic collection. Explicit collections still run.
    pub fn stop(&mut self) {
        self.gc.gc_stopped = true;
    }

    pub fn restart(&mut self) {
        self.gc.set_debt(0);
        self.gc.gc_stopped = false;
    }

    /// Whether checkpoints run collector work
    pub fn is_running(&self) -> bool {
        self.gc.is_running()
    }

    /// Run a full collection. Does nothing when called from a finalizer.
    pub fn collect(&mut self) {
        if self.gc.gc_stop_fin {
            return;
        }
        self.full_gc(false);
    }

    /// Explicit step. `0` performs one basic step; otherwise `kb` KiB are
    /// added to the debt before the checkpoint. Returns true when the step
    /// finished a cycle.
    pub fn step(&mut self, kb: usize) -> bool {
        if self.gc.gc_stop_fin {
            return false;
        }
        let old_stopped = self.gc.gc_stopped;
        self.gc.gc_stopped = false;
        let mut debt = 1;
        if kb == 0 {
            self.gc.set_debt(0);
            self.gc_step();
        } else {
            debt = isize::try_from(kb)
                .unwrap_or(isize::MAX)
                .saturating_mul(1024)
                .saturating_add(self.gc.gc_debt);
            self.gc.set_debt(debt);
            self.check_gc();
        }
        self.gc.gc_stopped = old_stopped;
        debt > 0 && self.gc.gc_state == GcState::Pause
    }

    /// Bytes in use
    pub fn count_bytes(&self) -> usize {
        self.gc.total_bytes().max(0) as usize
    }

    pub fn count_kb(&self) -> usize {
        self.count_bytes() >> 10
    }

    /// Live bytes left by the last completed collection
    pub fn estimate(&self) -> usize {
        self.gc.gc_estimate
    }

    /// Current mode. Reports generational while running full cycles after a
    /// bad major collection.
    pub fn mode(&self) -> GcKind {
        if self.gc.is_generational_mode() {
            GcKind::Generational
        } else {
            GcKind::Incremental
        }
    }

    /// Switch mode, returning the previous one. Ignored inside a finalizer.
    pub fn set_mode(&mut self, mode: GcKind) -> GcKind {
        let previous = self.mode();
        if self.gc.gc_stop_fin {
            return previous;
        }
        self.change_mode(mode);
        previous
    }

    /// Switch to incremental mode, updating the non-zero parameters
    pub fn set_incremental(&mut self, pause: u32, step_mul: u32, step_size: u32) -> GcKind {
        if self.gc.gc_stop_fin {
            return self.mode();
        }
        if pause != 0 {
            self.gc.params.pause = pause;
        }
        if step_mul != 0 {
            self.gc.params.step_mul = step_mul;
        }
        if step_size != 0 {
            self.gc.params.step_size = step_size;
        }
        self.set_mode(GcKind::Incremental)
    }

    /// Switch to generational mode, updating the non-zero parameters
    pub fn set_generational(&mut self, minor_mul: u32, major_mul: u32) -> GcKind {
        if self.gc.gc_stop_fin {
            return self.mode();
        }
        if minor_mul != 0 {
            self.gc.params.gen_minor_mul = minor_mul;
        }
        if major_mul != 0 {
            self.gc.params.gen_major_mul = major_mul;
        }
        self.set_mode(GcKind::Generational)
    }

    pub fn pause(&self) -> u32 {
        self.gc.params.pause
    }

    /// Returns the previous value
    pub fn set_pause(&mut self, pause: u32) -> u32 {
        std::mem::replace(&mut self.gc.params.pause, pause)
    }

    pub fn step_mul(&self) -> u32 {
        self.gc.params.step_mul
    }

    /// Returns the previous value
    pub fn set_step_mul(&mut self, step_mul: u32) -> u32 {
        std::mem::replace(&mut self.gc.params.step_mul, step_mul)
    }

    pub fn params(&self) -> GcParams {
        self.gc.params
    }

    pub fn set_params(&mut self, params: GcParams) {
        self.gc.params = params;
    }

    pub fn stats(&self) -> &GcStats {
        &self.gc.stats
    }
}
