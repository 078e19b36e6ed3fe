use super::GcKind;
use super::gc_limits::{
    DEFAULT_GC_MAJORMUL, DEFAULT_GC_MINORMUL, DEFAULT_GC_PAUSE, DEFAULT_GC_STEPMUL,
    DEFAULT_GC_STEPSIZE,
};

/// Collector tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GcParams {
    /// Percentage of the live estimate to wait for before a new cycle
    pub pause: u32,
    /// Work per step relative to allocation debt (percentage)
    pub step_mul: u32,
    /// Log2 of the bytes allocated between incremental steps
    pub step_size: u32,
    /// Growth (percentage) that triggers a minor collection
    pub gen_minor_mul: u32,
    /// Growth (percentage) since the last major collection that triggers a major one
    pub gen_major_mul: u32,
}

impl Default for GcParams {
    fn default() -> Self {
        Self {
            pause: DEFAULT_GC_PAUSE,
            step_mul: DEFAULT_GC_STEPMUL,
            step_size: DEFAULT_GC_STEPSIZE,
            gen_minor_mul: DEFAULT_GC_MINORMUL,
            gen_major_mul: DEFAULT_GC_MAJORMUL,
        }
    }
}

/// Heap configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GcOption {
    pub params: GcParams,
    /// Collection mode the heap starts in
    pub mode: GcKind,
    /// Maximum memory limit in bytes, enforced by the default allocator
    pub max_memory_limit: usize,
}

impl Default for GcOption {
    fn default() -> Self {
        Self {
            params: GcParams::default(),
            mode: GcKind::Incremental,
            max_memory_limit: usize::MAX,
        }
    }
}

#[cfg(feature = "serde")]
impl GcOption {
    /// Load a configuration from JSON, missing fields take their defaults
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let opt = GcOption::from_json(r#"{"mode":"Generational","params":{"pause":150}}"#).unwrap();
        assert_eq!(opt.mode, GcKind::Generational);
        assert_eq!(opt.params.pause, 150);
        assert_eq!(opt.params.step_mul, DEFAULT_GC_STEPMUL);
        assert_eq!(opt.max_memory_limit, usize::MAX);
    }
}
