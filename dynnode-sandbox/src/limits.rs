//! Resource limits configuration for sandboxed runs

/// Resource limits for one run's isolate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// V8 heap ceiling in bytes; exceeding it ends the run
    pub max_memory_bytes: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: Some(128 * 1024 * 1024), // 128 MB default
        }
    }
}

impl ResourceLimits {
    /// No heap ceiling (V8's own default applies)
    pub fn unlimited() -> Self {
        Self {
            max_memory_bytes: None,
        }
    }

    /// `(initial, max)` heap sizes handed to V8
    pub(crate) fn heap_limits(&self) -> Option<(usize, usize)> {
        self.max_memory_bytes
            .map(|max_bytes| ((max_bytes / 10).min(10 * 1024 * 1024), max_bytes))
    }
}
