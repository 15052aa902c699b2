//! Reusable scratch state for codec operations.

use std::collections::HashMap;

use schema::{HolderSchema, Visibility};

use crate::mask::ChangeMask;
use crate::visibility::visibility_mask;

/// Caches visibility masks across diff encodes.
///
/// Keyed by schema hash and granted set, so one scratch can serve every
/// holder type in a replication pass.
#[derive(Debug, Default)]
pub struct CodecScratch {
    visibility: HashMap<(u64, Visibility), ChangeMask>,
}

impl CodecScratch {
    /// Creates an empty scratch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached masks.
    #[must_use]
    pub fn cached_masks(&self) -> usize {
        self.visibility.len()
    }

    /// Drops every cached mask.
    pub fn clear(&mut self) {
        self.visibility.clear();
    }

    pub(crate) fn visibility_mask(
        &mut self,
        schema: &HolderSchema,
        granted: Visibility,
    ) -> &ChangeMask {
        self.visibility
            .entry((schema.hash(), granted))
            .or_insert_with(|| visibility_mask(schema, granted))
    }
}
