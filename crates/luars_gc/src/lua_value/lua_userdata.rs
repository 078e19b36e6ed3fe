use std::any::Any;

use super::LuaValue;
use crate::gc::GcId;

/// Full userdata: an opaque host payload plus user values and a metatable.
pub struct LuaUserdata {
    payload: Box<dyn Any>,
    /// Bytes reported for the payload, the collector cannot see inside it
    payload_size: usize,
    pub(crate) user_values: Vec<LuaValue>,
    metatable: Option<GcId>,
}

impl LuaUserdata {
    pub fn new(payload: Box<dyn Any>, payload_size: usize, num_user_values: usize) -> Self {
        LuaUserdata {
            payload,
            payload_size,
            user_values: vec![LuaValue::Nil; num_user_values],
            metatable: None,
        }
    }

    pub fn payload(&self) -> &dyn Any {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> &mut dyn Any {
        self.payload.as_mut()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn user_value(&self, n: usize) -> LuaValue {
        self.user_values.get(n).copied().unwrap_or_default()
    }

    pub fn num_user_values(&self) -> usize {
        self.user_values.len()
    }

    pub fn metatable(&self) -> Option<GcId> {
        self.metatable
    }

    pub(crate) fn set_metatable(&mut self, mt: Option<GcId>) {
        self.metatable = mt;
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaUserdata>()
            + self.payload_size
            + self.user_values.len() * std::mem::size_of::<LuaValue>()
    }
}
