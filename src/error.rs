use thiserror::Error;

/// Errors returned by set construction and fallible insertion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashSetError {
    #[error("expected items must be greater than zero, got {0}")]
    InvalidExpectedItems(usize),

    #[error("concurrency level must be greater than zero, got {0}")]
    InvalidConcurrencyLevel(usize),

    #[error("expected items ({expected_items}) must be at least the concurrency level ({concurrency_level})")]
    ExpectedItemsBelowConcurrency {
        expected_items: usize,
        concurrency_level: usize,
    },

    /// Doubling the section would overflow `usize`.
    #[error("section capacity {capacity} cannot be doubled")]
    CapacityOverflow { capacity: usize },

    /// The slot array for a rehash could not be allocated.
    #[error("failed to allocate {capacity} slots for section rehash")]
    AllocationFailed { capacity: usize },
}

pub type Result<T> = std::result::Result<T, HashSetError>;
