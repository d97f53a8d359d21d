//! Inline vs. on-disk storage placement

/// Default inline threshold: 100 KiB
pub const DEFAULT_INLINE_THRESHOLD: usize = 100 * 1024;

/// Where a payload is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// In the index row itself
    Inline,
    /// In a standalone blob file
    OnDisk,
}

#[derive(Debug, Clone, Copy)]
pub struct PlacementPolicy {
    inline_threshold: usize,
}

impl PlacementPolicy {
    pub fn new(inline_threshold: usize) -> Self {
        Self { inline_threshold }
    }

    pub fn inline_threshold(&self) -> usize {
        self.inline_threshold
    }

    /// Payloads at or below the threshold stay inline.
    pub fn decide(&self, size: usize) -> Placement {
        if size <= self.inline_threshold {
            Placement::Inline
        } else {
            Placement::OnDisk
        }
    }
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_THRESHOLD)
    }
}
