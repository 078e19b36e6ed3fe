// Tracing garbage collector
//
// Two modes share one marking engine:
// - Incremental: mark-sweep interleaved with the mutator, paced by debt
// - Generational: minor collections over young objects, with major
//   collections when memory grows past a multiple of the last baseline
//
// Accounting:
// - gc_debt: bytes allocated beyond the current threshold (> 0 means work is due)
// - total_bytes + gc_debt: bytes in use
// - gc_estimate: live bytes after the last collection
// - last_atomic: objects traversed by the last bad major collection
//
// Object ages (generational mode):
// - New: created in current cycle
// - Survival: survived one collection
// - Old0: marked old by forward barrier
// - Old1: first cycle as old
// - Old: really old
// - Touched1 / Touched2: old object touched this / previous cycle
//
// States:
// - Propagate: marking objects
// - EnterAtomic: propagation finished, atomic step pending
// - Atomic: inside the atomic step
// - SwpAllGc / SwpFinObj / SwpToBeFnz: sweeping each object list
// - SwpEnd: size maintenance
// - CallFin: calling pending finalizers
// - Pause: between cycles
//
// Tri-color invariant: outside the sweep phase, black objects never point
// to white objects.

mod atomic;
mod barrier;
mod finalizer;
mod gc_id;
pub mod gc_limits;
mod gc_object;
mod gc_option;
mod generational;
mod mark;
mod object_pool;
mod pacer;
mod string_interner;
mod sweep;

pub use gc_id::{GcId, GcList, Link};
pub use gc_object::*;
pub use gc_option::{GcOption, GcParams};
pub use object_pool::GcPool;
pub use string_interner::StringInterner;

use crate::lua_heap::LuaHeap;

/// Maximum value of the memory counters
const MAX_LMEM: isize = isize::MAX;

/// Collection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GcKind {
    Incremental,
    Generational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GcState {
    Propagate = 0,
    EnterAtomic = 1,
    Atomic = 2,
    SwpAllGc = 3,
    SwpFinObj = 4,
    SwpToBeFnz = 5,
    SwpEnd = 6,
    CallFin = 7,
    Pause = 8,
}

impl GcState {
    #[inline(always)]
    pub fn is_sweep_phase(self) -> bool {
        (GcState::SwpAllGc..=GcState::SwpEnd).contains(&self)
    }

    /// Whether black objects exist and the tri-color invariant must hold
    #[inline(always)]
    pub fn keep_invariant(self) -> bool {
        self <= GcState::Atomic
    }
}

/// Collector counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GcStats {
    /// Incremental cycles started
    pub cycles: usize,
    pub minor_collections: usize,
    pub major_collections: usize,
    pub emergency_collections: usize,
    pub objects_collected: usize,
    pub bytes_freed: usize,
    pub finalizers_run: usize,
    pub finalizer_errors: usize,
}

/// Collector-global state
pub struct GC {
    // ===== Accounting =====
    pub(crate) gc_debt: isize,
    pub(crate) total_bytes: isize,
    pub(crate) gc_estimate: usize,
    pub(crate) last_atomic: usize,

    // ===== Control =====
    pub(crate) current_white: u8,
    pub(crate) gc_state: GcState,
    pub(crate) gc_kind: GcKind,
    /// Running an emergency collection
    pub(crate) gc_emergency: bool,
    /// Collector is inside a step, emergency collections are not allowed
    pub(crate) gc_stopem: bool,
    /// Stopped by the host
    pub(crate) gc_stopped: bool,
    /// A finalizer is running
    pub(crate) gc_stop_fin: bool,
    /// The heap is closing
    pub(crate) gc_closing: bool,
    pub(crate) params: GcParams,

    // ===== Object lists =====
    pub(crate) allgc: Option<GcId>,
    pub(crate) finobj: Option<GcId>,
    pub(crate) tobefnz: Option<GcId>,
    pub(crate) fixedgc: Option<GcId>,
    /// Current position of the incremental sweep
    pub(crate) sweepgc: Option<Link>,

    // ===== Generational cursors =====
    pub(crate) survival: Option<GcId>,
    pub(crate) old1: Option<GcId>,
    pub(crate) reallyold: Option<GcId>,
    /// First Old1 object in `allgc`, an optimization for minor collections
    pub(crate) firstold1: Option<GcId>,
    pub(crate) finobjsur: Option<GcId>,
    pub(crate) finobjold1: Option<GcId>,
    pub(crate) finobjrold: Option<GcId>,

    // ===== Gray lists =====
    pub(crate) gray: Vec<GcId>,
    pub(crate) grayagain: Vec<GcId>,
    pub(crate) weak: Vec<GcId>,
    pub(crate) ephemeron: Vec<GcId>,
    pub(crate) allweak: Vec<GcId>,
    /// Threads with open upvalues
    pub(crate) twups: Vec<GcId>,

    pub(crate) stats: GcStats,
    /// Reused buffer for reference snapshots during traversal
    pub(crate) scratch: Vec<GcId>,
}

impl GC {
    pub fn new(option: &GcOption, base_bytes: usize) -> Self {
        GC {
            gc_debt: 0,
            total_bytes: base_bytes as isize,
            gc_estimate: base_bytes,
            last_atomic: 0,
            current_white: 0,
            gc_state: GcState::Pause,
            gc_kind: GcKind::Incremental,
            gc_emergency: false,
            gc_stopem: false,
            gc_stopped: false,
            gc_stop_fin: false,
            gc_closing: false,
            params: option.params,
            allgc: None,
            finobj: None,
            tobefnz: None,
            fixedgc: None,
            sweepgc: None,
            survival: None,
            old1: None,
            reallyold: None,
            firstold1: None,
            finobjsur: None,
            finobjold1: None,
            finobjrold: None,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            allweak: Vec::new(),
            twups: Vec::new(),
            stats: GcStats::default(),
            scratch: Vec::new(),
        }
    }

    /// Bytes currently in use
    #[inline(always)]
    pub fn total_bytes(&self) -> isize {
        self.total_bytes + self.gc_debt
    }

    /// Install a new debt keeping the real byte count unchanged
    pub fn set_debt(&mut self, debt: isize) {
        let tb = self.total_bytes();
        let debt = debt.max(tb - MAX_LMEM);
        self.total_bytes = tb - debt;
        self.gc_debt = debt;
    }

    #[inline(always)]
    pub fn other_white(&self) -> u8 {
        GcHeader::otherwhite(self.current_white)
    }

    #[inline(always)]
    pub fn keep_invariant(&self) -> bool {
        self.gc_state.keep_invariant()
    }

    #[inline(always)]
    pub fn is_sweep_phase(&self) -> bool {
        self.gc_state.is_sweep_phase()
    }

    /// No stop reason is active
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        !(self.gc_stopped || self.gc_stop_fin || self.gc_closing)
    }

    /// Generational, or incremental only while recovering from a bad major collection
    #[inline(always)]
    pub fn is_generational_mode(&self) -> bool {
        self.gc_kind == GcKind::Generational || self.last_atomic != 0
    }

    pub fn state(&self) -> GcState {
        self.gc_state
    }

    pub fn kind(&self) -> GcKind {
        self.gc_kind
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn params(&self) -> &GcParams {
        &self.params
    }

    pub(crate) fn clear_gray_lists(&mut self) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        self.allweak.clear();
        self.ephemeron.clear();
    }

    fn head_mut(&mut self, list: GcList) -> &mut Option<GcId> {
        match list {
            GcList::AllGc => &mut self.allgc,
            GcList::FinObj => &mut self.finobj,
            GcList::ToBeFnz => &mut self.tobefnz,
            GcList::FixedGc => &mut self.fixedgc,
        }
    }

    fn head(&self, list: GcList) -> Option<GcId> {
        match list {
            GcList::AllGc => self.allgc,
            GcList::FinObj => self.finobj,
            GcList::ToBeFnz => self.tobefnz,
            GcList::FixedGc => self.fixedgc,
        }
    }
}

// ============ List plumbing ============

impl LuaHeap {
    /// Object stored at a list position
    #[inline(always)]
    pub(crate) fn get_link(&self, link: Link) -> Option<GcId> {
        match link {
            Link::Head(list) => self.gc.head(list),
            Link::Next(id) => self.pool[id].next,
        }
    }

    #[inline(always)]
    pub(crate) fn set_link(&mut self, link: Link, value: Option<GcId>) {
        match link {
            Link::Head(list) => *self.gc.head_mut(list) = value,
            Link::Next(id) => self.pool[id].next = value,
        }
    }

    /// Position holding `target` in the list starting at `start`
    pub(crate) fn find_link(&self, start: Link, target: GcId) -> Option<Link> {
        let mut p = start;
        loop {
            match self.get_link(p) {
                Some(curr) if curr == target => return Some(p),
                Some(curr) => p = Link::Next(curr),
                None => return None,
            }
        }
    }

    /// Position of the final `None` in a list
    pub(crate) fn find_last(&self, start: Link) -> Link {
        let mut p = start;
        while let Some(curr) = self.get_link(p) {
            p = Link::Next(curr);
        }
        p
    }

    #[inline(always)]
    pub(crate) fn header(&self, id: GcId) -> &GcHeader {
        &self.pool[id].header
    }

    #[inline(always)]
    pub(crate) fn header_mut(&mut self, id: GcId) -> &mut GcHeader {
        &mut self.pool[id].header
    }
}
