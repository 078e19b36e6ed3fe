//! Collector constants and tuning defaults.
//!
//! Every magic number that shapes collector pacing lives here. The
//! defaults are empirical; embedders override them through `GcParams`.

use crate::lua_value::LuaValue;

// ===== GC Defaults =====

/// Default pause (percentage). A new cycle starts when memory use reaches
/// this percentage of the live estimate; 200 waits until memory doubles.
pub const DEFAULT_GC_PAUSE: u32 = 200;

/// Default step multiplier (percentage). Work done per step relative to
/// the allocation debt.
pub const DEFAULT_GC_STEPMUL: u32 = 100;

/// Default step size, as log2 of bytes (13 = 8 KiB).
pub const DEFAULT_GC_STEPSIZE: u32 = 13;

/// Default minor multiplier (percentage). A minor collection runs after
/// memory grows this much relative to its size after the previous one.
pub const DEFAULT_GC_MINORMUL: u32 = 20;

/// Default major multiplier (percentage). A major collection runs after
/// memory grows this much relative to the last major collection.
pub const DEFAULT_GC_MAJORMUL: u32 = 100;

// ===== Pacing =====

/// Maximum number of objects swept per single step.
pub const GC_SWEEPMAX: usize = 100;

/// Maximum number of finalizers called per single step.
pub const GC_FINMAX: usize = 10;

/// Work charged for each finalizer call.
pub const GC_FINALIZECOST: usize = 50;

/// Bytes of allocation equivalent to one unit of traversal work.
pub const WORK2MEM: isize = std::mem::size_of::<LuaValue>() as isize;

/// Divisor applied to the live estimate before multiplying by the pause.
pub const PAUSEADJ: usize = 100;

/// Debt installed while the collector is stopped, so the checkpoint
/// stays cheap until the next check.
pub const GC_STOPPED_DEBT: isize = -2000;

// ===== Strings =====

/// Maximum length of an interned short string.
pub const LUAI_MAXSHORTLEN: usize = 40;

/// Minimum (and initial) number of buckets in the string table.
pub const MINSTRTABSIZE: usize = 128;

/// The string table never grows past this many buckets.
pub const MAXSTRTB: usize = 1 << 30;

// ===== Threads =====

/// Minimum guaranteed stack slots.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack size for new threads.
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Maximum stack size in slots.
pub const LUAI_MAXSTACK: usize = 1_000_000;

// ===== Registry =====

/// Registry slot holding the main thread.
pub const LUA_RIDX_MAINTHREAD: i64 = 1;

/// Registry slot holding the globals table.
pub const LUA_RIDX_GLOBALS: i64 = 2;
