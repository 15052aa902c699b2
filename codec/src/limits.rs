//! Limits for codec-level decoding.

/// Bounds enforced while applying baseline and diff payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecLimits {
    /// Maximum nesting depth of holders inside a payload.
    pub max_depth: usize,
    /// Maximum length of any dynamic collection.
    pub max_dynamic_len: usize,
    /// Maximum byte length of any string value.
    pub max_string_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_dynamic_len: 4096,
            max_string_bytes: 4096,
        }
    }
}

impl CodecLimits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_depth: 4,
            max_dynamic_len: 64,
            max_string_bytes: 64,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_depth: usize::MAX,
            max_dynamic_len: usize::MAX,
            max_string_bytes: usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_reasonable() {
        let limits = CodecLimits::default();
        assert!(limits.max_depth >= 4);
        assert!(limits.max_dynamic_len >= 1024);
    }

    #[test]
    fn testing_limits_smaller() {
        let test_limits = CodecLimits::for_testing();
        let default_limits = CodecLimits::default();
        assert!(test_limits.max_depth < default_limits.max_depth);
        assert!(test_limits.max_dynamic_len < default_limits.max_dynamic_len);
    }

    #[test]
    fn unlimited_limits() {
        let limits = CodecLimits::unlimited();
        assert_eq!(limits.max_dynamic_len, usize::MAX);
        assert_eq!(limits.max_string_bytes, usize::MAX);
    }
}
