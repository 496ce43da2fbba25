//! Error types for page allocation and storage access.

use std::io;

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while allocating, freeing or accessing pages.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Offset lies beyond the backing region and growth did not cover it.
    #[error("offset {offset:#x} exceeds backing capacity {capacity:#x}")]
    OutOfRange { offset: u64, capacity: u64 },

    /// An index page that was expected to have room had none.
    #[error("index page at {offset:#x} is full")]
    PageFull { offset: u64 },

    /// A branch pointer on the path to a freed page was never set.
    #[error("page {page} lies in a subtree that was never allocated")]
    UnexpectedAllocation { page: u64 },

    /// Double free, or a page that was never handed out.
    #[error("page {page} is not allocated")]
    NotAllocated { page: u64 },

    /// The page belongs to the store itself and can't be freed.
    #[error("page {page} is reserved")]
    Reserved { page: u64 },

    /// Offset is not a multiple of the page size.
    #[error("offset {offset:#x} is not page-aligned")]
    Misaligned { offset: u64 },

    /// The backing region was asked to grow while growth was forbidden.
    #[error("unexpected growth to offset {offset:#x} during deallocation")]
    UnexpectedGrowth { offset: u64 },

    /// Persisted state does not describe a valid store.
    #[error("corrupted store: {0}")]
    Corrupted(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {source}")]
    Config {
        #[from]
        source: serde_json::Error,
    },

    /// Configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Returns true if the caller misused deallocation (double free, foreign
    /// or reserved page, unaligned offset).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedAllocation { .. }
                | Self::NotAllocated { .. }
                | Self::Reserved { .. }
                | Self::Misaligned { .. }
        )
    }

    /// Returns true if the error points at a bug in the allocator rather
    /// than at the caller or the environment.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::PageFull { .. } | Self::UnexpectedGrowth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation() {
        assert!(StoreError::NotAllocated { page: 3 }.is_protocol_violation());
        assert!(StoreError::Misaligned { offset: 5 }.is_protocol_violation());
        assert!(!StoreError::PageFull { offset: 4096 }.is_protocol_violation());
    }

    #[test]
    fn test_internal() {
        assert!(StoreError::UnexpectedGrowth { offset: 0 }.is_internal());
        assert!(!StoreError::Reserved { page: 0 }.is_internal());
    }

    #[test]
    fn test_from_io() {
        let err: StoreError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_display() {
        let err = StoreError::OutOfRange {
            offset: 0x5000,
            capacity: 0x4000,
        };
        assert_eq!(err.to_string(), "offset 0x5000 exceeds backing capacity 0x4000");
    }
}
