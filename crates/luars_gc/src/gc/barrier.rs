// Write barriers
//
// Forward barrier: a black object now points to a white one. While the
// invariant holds the white object is marked (and aged Old0 if the writer
// is old); during the sweep the writer is repainted white instead.
//
// Back barrier: the black container goes back to gray and is revisited in
// the atomic step. In generational mode it also becomes Touched1.
use super::{GcAge, GcId, GcKind};
use crate::lua_heap::LuaHeap;
use crate::lua_value::LuaValue;

impl LuaHeap {
    /// Forward barrier for storing `value` into `obj`
    #[inline]
    pub(crate) fn barrier(&mut self, obj: GcId, value: LuaValue) {
        if let Some(v) = value.as_gc_id() {
            self.obj_barrier(obj, v);
        }
    }

    #[inline]
    pub(crate) fn obj_barrier(&mut self, obj: GcId, v: GcId) {
        if self.header(obj).is_black() && self.header(v).is_white() {
            self.barrier_forward(obj, v);
        }
    }

    /// Back barrier for storing `value` into container `obj`
    #[inline]
    pub(crate) fn barrier_back(&mut self, obj: GcId, value: LuaValue) {
        if let Some(v) = value.as_gc_id() {
            if self.header(obj).is_black() && self.header(v).is_white() {
                self.barrier_back_slow(obj);
            }
        }
    }

    fn barrier_forward(&mut self, obj: GcId, v: GcId) {
        let other_white = self.gc.other_white();
        debug_assert!(!self.header(v).is_dead(other_white) && !self.header(obj).is_dead(other_white));
        if self.gc.keep_invariant() {
            self.really_mark_object(v);
            if self.header(obj).is_old() {
                debug_assert!(!self.header(v).is_old());
                self.header_mut(v).set_age(GcAge::Old0);
            }
        } else {
            debug_assert!(self.gc.is_sweep_phase());
            if self.gc.gc_kind == GcKind::Incremental {
                let white = self.gc.current_white;
                self.header_mut(obj).make_white(white);
            }
        }
    }

    fn barrier_back_slow(&mut self, obj: GcId) {
        let header = self.header_mut(obj);
        let age = header.age();
        if age == GcAge::Touched2 {
            // Already in 'grayagain'
            header.make_gray();
        } else {
            header.make_gray();
            self.gc.grayagain.push(obj);
        }
        if age.is_old() {
            self.header_mut(obj).set_age(GcAge::Touched1);
        }
    }
}
