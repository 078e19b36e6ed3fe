// ============ GC Header ============

use crate::gc::GcId;
use crate::lua_value::{
    LuaClosure, LuaProto, LuaString, LuaTable, LuaThread, LuaUpvalue, LuaUserdata, LuaValue,
    NativeClosure,
};

// Color bit positions in the marked field. Bits 0-2 hold the age.
pub const WHITE0BIT: u8 = 3;
pub const WHITE1BIT: u8 = 4;
pub const BLACKBIT: u8 = 5;
/// Object is linked in `finobj` or `tobefnz`
pub const FINALIZEDBIT: u8 = 6;

pub const WHITEBITS: u8 = (1 << WHITE0BIT) | (1 << WHITE1BIT);
pub const AGEBITS: u8 = 0x07;
pub const MASKCOLORS: u8 = (1 << BLACKBIT) | WHITEBITS;
pub const MASKGCBITS: u8 = MASKCOLORS | AGEBITS;

/// Object ages for generational mode, stored in bits 0-2 of `marked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum GcAge {
    /// Created in current cycle
    New = 0,
    /// Created in previous cycle
    Survival = 1,
    /// Marked old by a forward barrier in this cycle
    Old0 = 2,
    /// First full cycle as old
    Old1 = 3,
    /// Really old object, not visited by minor collections
    Old = 4,
    /// Old object touched this cycle
    Touched1 = 5,
    /// Old object touched in previous cycle
    Touched2 = 6,
}

impl GcAge {
    #[inline(always)]
    pub fn from_bits(bits: u8) -> GcAge {
        match bits & AGEBITS {
            0 => GcAge::New,
            1 => GcAge::Survival,
            2 => GcAge::Old0,
            3 => GcAge::Old1,
            4 => GcAge::Old,
            5 => GcAge::Touched1,
            _ => GcAge::Touched2,
        }
    }

    /// Age after surviving a minor collection. New objects are handled by
    /// the sweeper itself (they become survivals and white again).
    #[inline(always)]
    pub fn next_age(self) -> GcAge {
        match self {
            GcAge::New => GcAge::Survival,
            GcAge::Survival => GcAge::Old1,
            GcAge::Old0 => GcAge::Old1,
            GcAge::Old1 => GcAge::Old,
            GcAge::Old => GcAge::Old,
            GcAge::Touched1 => GcAge::Touched1,
            GcAge::Touched2 => GcAge::Touched2,
        }
    }

    #[inline(always)]
    pub fn is_old(self) -> bool {
        self > GcAge::Survival
    }
}

/// Header embedded in every collectable object.
///
/// Bit layout of `marked`:
/// - Bits 0-2: age
/// - Bit 3: WHITE0
/// - Bit 4: WHITE1
/// - Bit 5: BLACK
/// - Bit 6: FINALIZEDBIT
///
/// Gray is implicit: no white bit and no black bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHeader {
    pub marked: u8,
    /// Bytes accounted for this object
    pub size: usize,
}

impl GcHeader {
    /// New objects are born with the current white and age `New`.
    #[inline(always)]
    pub fn with_white(current_white: u8, size: usize) -> Self {
        debug_assert!(current_white == 0 || current_white == 1);
        GcHeader {
            marked: 1 << (WHITE0BIT + current_white),
            size,
        }
    }

    // ============ Age ============

    #[inline(always)]
    pub fn age(&self) -> GcAge {
        GcAge::from_bits(self.marked)
    }

    #[inline(always)]
    pub fn set_age(&mut self, age: GcAge) {
        self.marked = (self.marked & !AGEBITS) | age as u8;
    }

    /// Replace `from` by `to`, asserting the previous age
    #[inline(always)]
    pub fn change_age(&mut self, from: GcAge, to: GcAge) {
        debug_assert_eq!(self.age(), from);
        self.marked ^= (from as u8) ^ (to as u8);
    }

    #[inline(always)]
    pub fn is_old(&self) -> bool {
        self.age().is_old()
    }

    // ============ Color ============

    #[inline(always)]
    pub fn is_white(&self) -> bool {
        (self.marked & WHITEBITS) != 0
    }

    #[inline(always)]
    pub fn is_black(&self) -> bool {
        (self.marked & (1 << BLACKBIT)) != 0
    }

    #[inline(always)]
    pub fn is_gray(&self) -> bool {
        (self.marked & MASKCOLORS) == 0
    }

    /// Paint with the current white, keeping age and finalize bits
    #[inline(always)]
    pub fn make_white(&mut self, current_white: u8) {
        self.marked = (self.marked & !MASKCOLORS) | (1 << (WHITE0BIT + current_white));
    }

    /// Current white and age `New`, as the incremental sweeper leaves survivors
    #[inline(always)]
    pub fn reset_to_white(&mut self, current_white: u8) {
        self.marked = (self.marked & !MASKGCBITS) | (1 << (WHITE0BIT + current_white));
    }

    /// Current white and age `Survival`, as the generational sweeper leaves
    /// new objects that survived a minor collection
    #[inline(always)]
    pub fn reset_to_survival(&mut self, current_white: u8) {
        self.marked = (self.marked & !MASKGCBITS)
            | GcAge::Survival as u8
            | (1 << (WHITE0BIT + current_white));
    }

    #[inline(always)]
    pub fn make_gray(&mut self) {
        self.marked &= !MASKCOLORS;
    }

    #[inline(always)]
    pub fn make_black(&mut self) {
        self.marked = (self.marked & !WHITEBITS) | (1 << BLACKBIT);
    }

    /// Black from a non-white state
    #[inline(always)]
    pub fn nw2black(&mut self) {
        debug_assert!(!self.is_white());
        self.marked |= 1 << BLACKBIT;
    }

    /// Flip between WHITE0 and WHITE1
    #[inline(always)]
    pub fn change_white(&mut self) {
        self.marked ^= WHITEBITS;
    }

    /// Carries the white that denotes death in this cycle
    #[inline(always)]
    pub fn is_dead(&self, other_white: u8) -> bool {
        (self.marked & (1 << (WHITE0BIT + other_white))) != 0
    }

    #[inline(always)]
    pub fn otherwhite(current_white: u8) -> u8 {
        current_white ^ 1
    }

    // ============ Finalization ============

    #[inline(always)]
    pub fn to_finalize(&self) -> bool {
        (self.marked & (1 << FINALIZEDBIT)) != 0
    }

    #[inline(always)]
    pub fn set_finalized(&mut self) {
        self.marked |= 1 << FINALIZEDBIT;
    }

    #[inline(always)]
    pub fn clear_finalized(&mut self) {
        self.marked &= !(1 << FINALIZEDBIT);
    }
}

// ============ Object kinds ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcObjectKind {
    ShortString,
    LongString,
    Table,
    Userdata,
    LuaClosure,
    NativeClosure,
    Proto,
    Upvalue,
    Thread,
}

/// Payload of a collectable object.
pub enum GcBody {
    String(LuaString),
    Table(LuaTable),
    Userdata(LuaUserdata),
    LuaClosure(LuaClosure),
    NativeClosure(NativeClosure),
    Proto(LuaProto),
    Upvalue(LuaUpvalue),
    Thread(LuaThread),
}

impl GcBody {
    pub fn kind(&self) -> GcObjectKind {
        match self {
            GcBody::String(s) if s.is_short() => GcObjectKind::ShortString,
            GcBody::String(_) => GcObjectKind::LongString,
            GcBody::Table(_) => GcObjectKind::Table,
            GcBody::Userdata(_) => GcObjectKind::Userdata,
            GcBody::LuaClosure(_) => GcObjectKind::LuaClosure,
            GcBody::NativeClosure(_) => GcObjectKind::NativeClosure,
            GcBody::Proto(_) => GcObjectKind::Proto,
            GcBody::Upvalue(_) => GcObjectKind::Upvalue,
            GcBody::Thread(_) => GcObjectKind::Thread,
        }
    }

    /// Bytes this payload accounts for
    pub fn mem_size(&self) -> usize {
        let body = match self {
            GcBody::String(s) => s.mem_size(),
            GcBody::Table(t) => t.mem_size(),
            GcBody::Userdata(u) => u.mem_size(),
            GcBody::LuaClosure(c) => c.mem_size(),
            GcBody::NativeClosure(c) => c.mem_size(),
            GcBody::Proto(p) => p.mem_size(),
            GcBody::Upvalue(u) => u.mem_size(),
            GcBody::Thread(t) => t.mem_size(),
        };
        body + std::mem::size_of::<GcHeader>()
    }

    /// Every outgoing reference, ignoring weakness. Open upvalues report
    /// nothing: their value lives in the owning thread's stack.
    pub fn collect_refs(&self, out: &mut Vec<GcId>) {
        fn push(out: &mut Vec<GcId>, v: &LuaValue) {
            if let Some(id) = v.as_gc_id() {
                out.push(id);
            }
        }
        match self {
            GcBody::String(_) => {}
            GcBody::Table(t) => {
                out.extend(t.metatable());
                t.array.iter().for_each(|v| push(out, v));
                for (k, v) in t.hash.iter() {
                    push(out, k);
                    push(out, v);
                }
            }
            GcBody::Userdata(u) => {
                out.extend(u.metatable());
                u.user_values.iter().for_each(|v| push(out, v));
            }
            GcBody::LuaClosure(c) => {
                out.push(c.proto);
                out.extend(c.upvalues.iter().flatten());
            }
            GcBody::NativeClosure(c) => c.upvalues.iter().for_each(|v| push(out, v)),
            GcBody::Proto(p) => {
                out.extend(p.source);
                p.constants.iter().for_each(|v| push(out, v));
                out.extend(p.upvalue_names.iter().flatten());
                out.extend(p.protos.iter().copied());
                out.extend(p.local_names.iter().flatten());
            }
            GcBody::Upvalue(LuaUpvalue::Closed(v)) => push(out, v),
            GcBody::Upvalue(LuaUpvalue::Open { .. }) => {}
            GcBody::Thread(th) => {
                if let Some(stack) = &th.stack {
                    stack[..th.top].iter().for_each(|v| push(out, v));
                }
                out.extend(th.open_upvalues.iter().copied());
            }
        }
    }
}

/// A collectable object: header, intrusive list link and payload.
pub struct GcObject {
    pub header: GcHeader,
    pub next: Option<GcId>,
    pub body: GcBody,
}

macro_rules! body_accessors {
    ($($get:ident, $get_mut:ident, $variant:ident, $ty:ty;)*) => {
        impl GcObject {
            $(
                #[inline(always)]
                pub fn $get(&self) -> Option<&$ty> {
                    match &self.body {
                        GcBody::$variant(x) => Some(x),
                        _ => None,
                    }
                }

                #[inline(always)]
                pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                    match &mut self.body {
                        GcBody::$variant(x) => Some(x),
                        _ => None,
                    }
                }
            )*
        }
    };
}

body_accessors! {
    as_string, as_string_mut, String, LuaString;
    as_table, as_table_mut, Table, LuaTable;
    as_userdata, as_userdata_mut, Userdata, LuaUserdata;
    as_lua_closure, as_lua_closure_mut, LuaClosure, LuaClosure;
    as_native_closure, as_native_closure_mut, NativeClosure, NativeClosure;
    as_proto, as_proto_mut, Proto, LuaProto;
    as_upvalue, as_upvalue_mut, Upvalue, LuaUpvalue;
    as_thread, as_thread_mut, Thread, LuaThread;
}

impl GcObject {
    #[inline(always)]
    pub fn kind(&self) -> GcObjectKind {
        self.body.kind()
    }

    /// The first-class value for this object, if it has one
    pub fn to_value(&self, id: GcId) -> Option<LuaValue> {
        match self.body {
            GcBody::String(_) => Some(LuaValue::String(id)),
            GcBody::Table(_) => Some(LuaValue::Table(id)),
            GcBody::Userdata(_) => Some(LuaValue::Userdata(id)),
            GcBody::LuaClosure(_) | GcBody::NativeClosure(_) => Some(LuaValue::Function(id)),
            GcBody::Thread(_) => Some(LuaValue::Thread(id)),
            GcBody::Proto(_) | GcBody::Upvalue(_) => None,
        }
    }
}
