use crate::gc::{DEFAULT_PAUSE, DEFAULT_STEPMUL, GCSTEPSIZE};

/// Collector tuning, fixed at runtime creation except for `pause` and
/// `step_mul` which can be changed later through the runtime.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GcOption {
    /// Heap growth allowed between cycles, in percent of the live estimate
    pub pause: i32,
    /// Collector speed relative to allocation, in percent
    pub step_mul: i32,
    /// Credit in bytes a step must earn before returning
    pub step_size: isize,
    /// Finalizers called in the first batch after an atomic phase
    pub finalizer_quota: usize,
    /// Byte budget enforced by the default allocator
    pub max_memory: usize,
    /// Run an emergency collection before failing an allocation
    pub emergency_gc: bool,
}

impl Default for GcOption {
    fn default() -> Self {
        Self {
            pause: DEFAULT_PAUSE,
            step_mul: DEFAULT_STEPMUL,
            step_size: GCSTEPSIZE,
            finalizer_quota: 1,
            max_memory: usize::MAX,
            emergency_gc: true,
        }
    }
}

impl GcOption {
    /// Parse a JSON object; missing fields take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// GCSWEEPMAX: objects examined per sweep step
    pub(crate) fn sweep_max(&self) -> usize {
        ((self.step_size / crate::gc::GCSWEEPCOST) / 4).max(1) as usize
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_partial() {
        let option = GcOption::from_json(r#"{ "pause": 150, "max_memory": 65536 }"#).unwrap();
        assert_eq!(option.pause, 150);
        assert_eq!(option.max_memory, 65536);
        assert_eq!(option.step_mul, DEFAULT_STEPMUL);
        assert!(option.emergency_gc);
    }
}
