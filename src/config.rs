//! Construction parameters for [`ConcurrentOpenHashSet`](crate::ConcurrentOpenHashSet).

use crate::error::{HashSetError, Result};
use crate::hash::ceil_pow2;

/// Expected number of items when none is given.
pub const DEFAULT_EXPECTED_ITEMS: usize = 256;

/// Number of sections when none is given.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 16;

/// Load factor above which a section doubles its capacity.
pub const MAP_FILL_FACTOR: f32 = 0.66;

/// Sizing of a set: how many items it should hold before any section grows and how many
/// independently locked sections it is split into.
///
/// ```
/// use openhashset_rs::Config;
///
/// let config = Config::default().expected_items(1024).concurrency_level(8);
/// assert_eq!(config.validate().unwrap().sections, 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    expected_items: usize,
    concurrency_level: usize,
}

/// Validated sizing derived from a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Number of sections, always a power of two.
    pub sections: usize,
    /// Initial capacity of every section, always a power of two.
    pub section_capacity: usize,
}

/// Layout produced by `Config::default()`.
pub(crate) const DEFAULT_LAYOUT: Layout = Layout {
    sections: DEFAULT_CONCURRENCY_LEVEL,
    section_capacity: 32,
};

impl Default for Config {
    fn default() -> Self {
        Self {
            expected_items: DEFAULT_EXPECTED_ITEMS,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
        }
    }
}

impl Config {
    pub fn new(expected_items: usize, concurrency_level: usize) -> Self {
        Self {
            expected_items,
            concurrency_level,
        }
    }

    pub fn expected_items(mut self, expected_items: usize) -> Self {
        self.expected_items = expected_items;
        self
    }

    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        self.concurrency_level = concurrency_level;
        self
    }

    /// Check the parameters and compute the section layout.
    ///
    /// A concurrency level that is not a power of two is rounded up so that section routing can
    /// mask instead of divide.
    pub fn validate(&self) -> Result<Layout> {
        if self.expected_items == 0 {
            return Err(HashSetError::InvalidExpectedItems(self.expected_items));
        }
        if self.concurrency_level == 0 {
            return Err(HashSetError::InvalidConcurrencyLevel(self.concurrency_level));
        }
        if self.expected_items < self.concurrency_level {
            return Err(HashSetError::ExpectedItemsBelowConcurrency {
                expected_items: self.expected_items,
                concurrency_level: self.concurrency_level,
            });
        }

        let sections = ceil_pow2(self.concurrency_level).ok_or(
            HashSetError::InvalidConcurrencyLevel(self.concurrency_level),
        )?;
        if sections != self.concurrency_level {
            tracing::debug!(
                requested = self.concurrency_level,
                sections,
                "rounded concurrency level up to a power of two"
            );
        }

        let per_section_items = self.expected_items / sections;
        let section_capacity = ceil_pow2((per_section_items as f32 / MAP_FILL_FACTOR) as usize)
            .ok_or(HashSetError::CapacityOverflow {
                capacity: per_section_items,
            })?;

        Ok(Layout {
            sections,
            section_capacity,
        })
    }
}

/// Number of used buckets a section of `capacity` may hold before it must grow.
#[inline]
pub(crate) fn resize_threshold(capacity: usize) -> usize {
    (capacity as f32 * MAP_FILL_FACTOR) as usize
}
