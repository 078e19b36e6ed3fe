// ============ Object IDs ============
// Every collectable object is addressed by a u32 slot index into the arena.

/// Handle to a collectable object living in a `GcPool`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct GcId(pub u32);

impl GcId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Object lists whose heads live in the collector state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcList {
    /// General objects
    AllGc,
    /// Objects with a declared finalizer
    FinObj,
    /// Unreachable objects whose finalizer has not run yet
    ToBeFnz,
    /// Pinned objects, never collected
    FixedGc,
}

/// A position inside an object list, i.e. the slot that holds the next id.
///
/// `Head(list)` is the list head itself, `Next(id)` is the `next` field of `id`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Link {
    Head(GcList),
    Next(GcId),
}
