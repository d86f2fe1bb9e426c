#![forbid(unsafe_code)]
//! Error types for uicache.
//!
//! # Error Taxonomy
//!
//! The cache is always an optional fast path in front of a real swap device,
//! so almost nothing here is fatal. Errors fall into two groups:
//!
//! | Group | Variants | Caller reaction |
//! |-------|----------|-----------------|
//! | Declined | `OutOfMemory`, `OutOfSpace` | Fall through to the backing device |
//! | Rejected input | `InvalidScope`, `InvalidPageLength`, `InvalidCapacity`, `Config`, `Parse` | Report to the admin surface |
//! | Host | `Io` | Report to the admin surface |
//!
//! A lookup miss is never an error; it is `None`. Operations on a scope that
//! was never armed are silent no-ops on the hot paths.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `OutOfMemory` | `ENOMEM` |
//! | `OutOfSpace` | `ENOSPC` |
//! | `InvalidScope` | `EINVAL` |
//! | `InvalidPageLength` | `EINVAL` |
//! | `InvalidCapacity` | `EINVAL` |
//! | `Config` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `Io` | raw OS error, else `EIO` |
//!
//! `uic-error` does not depend on `uic-types`; conversions from the
//! type-level errors happen in the crates that use both.

use thiserror::Error;

/// Unified error type for uicache operations.
#[derive(Debug, Error)]
pub enum UicError {
    /// An entry or scope allocation was refused.
    #[error("out of memory")]
    OutOfMemory,

    /// The content store already holds its full budget of pages.
    #[error("content store full: {limit} pages")]
    OutOfSpace { limit: usize },

    /// Scope identifier failed validation.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// A page payload did not match the fixed page size.
    #[error("invalid page length: got {got}, expected {expected}")]
    InvalidPageLength { got: usize, expected: usize },

    /// A tracker capacity was out of range.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Admin command or trace line could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UicError {
    /// Map to a POSIX errno for a hook layer that reports status codes.
    ///
    /// Exhaustive on purpose: a new variant must pick its errno here.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::OutOfMemory => libc::ENOMEM,
            Self::OutOfSpace { .. } => libc::ENOSPC,
            Self::InvalidScope(_)
            | Self::InvalidPageLength { .. }
            | Self::InvalidCapacity(_)
            | Self::Config(_)
            | Self::Parse(_) => libc::EINVAL,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// True when the error only means "the cache was not used this time".
    #[must_use]
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::OutOfMemory | Self::OutOfSpace { .. })
    }
}

/// Result alias using `UicError`.
pub type Result<T> = std::result::Result<T, UicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(UicError, libc::c_int)> = vec![
            (UicError::OutOfMemory, libc::ENOMEM),
            (UicError::OutOfSpace { limit: 8 }, libc::ENOSPC),
            (UicError::InvalidScope("".into()), libc::EINVAL),
            (
                UicError::InvalidPageLength {
                    got: 1,
                    expected: 4096,
                },
                libc::EINVAL,
            ),
            (UicError::InvalidCapacity("0".into()), libc::EINVAL),
            (UicError::Config("max_entries=0".into()), libc::EINVAL),
            (UicError::Parse("bad".into()), libc::EINVAL),
            (UicError::Io(std::io::Error::other("test")), libc::EIO),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.to_errno(), *expected, "wrong errno for {error:?}");
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let err = UicError::Io(std::io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn only_budget_and_allocation_are_declines() {
        assert!(UicError::OutOfMemory.is_declined());
        assert!(UicError::OutOfSpace { limit: 1 }.is_declined());
        assert!(!UicError::Parse("x".into()).is_declined());
        assert!(!UicError::InvalidScope("x".into()).is_declined());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(
            UicError::OutOfSpace { limit: 25600 }.to_string(),
            "content store full: 25600 pages"
        );
        assert_eq!(
            UicError::InvalidPageLength {
                got: 12,
                expected: 4096
            }
            .to_string(),
            "invalid page length: got 12, expected 4096"
        );
    }
}
