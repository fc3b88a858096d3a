#![forbid(unsafe_code)]
//! Error types for vbd.
//!
//! # Error Taxonomy
//!
//! Every failure in the device core is a value. Nothing here is fatal to a
//! live device: a failed transfer ends the request that caused it and the
//! device and its queue stay usable. The only fatal path is construction
//! (`AllocationFailure`, `InvalidConfig`, `InvalidKey`), where the device
//! never becomes usable.
//!
//! | Variant | Scope | errno |
//! |---------|-------|-------|
//! | `OutOfRange` | per request | `EIO` |
//! | `UnalignedTransform` | per request | `EINVAL` |
//! | `UnsupportedRequestKind` | per request | `EOPNOTSUPP` |
//! | `InvalidRequest` | per request | `EINVAL` |
//! | `ShortBuffer` | per request | `EINVAL` |
//! | `NotOpen` | lifecycle | `ENXIO` |
//! | `AllocationFailure` | construction | `ENOMEM` |
//! | `InvalidKey` | construction | `EINVAL` |
//! | `InvalidConfig` | construction | `EINVAL` |
//! | `Io` | config loading | raw OS error or `EIO` |
//!
//! No variant is ever retried inside the core.
//!
//! `vbd-error` MUST NOT depend on `vbd-types`; request kinds and geometry are
//! carried as owned strings and plain integers.

use thiserror::Error;

/// Unified error type for all vbd operations.
#[derive(Debug, Error)]
pub enum VbdError {
    /// Operating system I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested byte span exceeds the device capacity.
    ///
    /// Raised before any byte is moved; the backing store is unchanged.
    #[error("span out of range: offset={offset} len={len} capacity={capacity}")]
    OutOfRange { offset: u64, len: u64, capacity: u64 },

    /// Transform span is not a whole number of cipher blocks.
    #[error("unaligned transform: len={len} is not a multiple of cipher block size {block_size}")]
    UnalignedTransform { len: usize, block_size: usize },

    /// A request whose kind is not a storage operation reached the dispatcher.
    #[error("unsupported request kind: {0}")]
    UnsupportedRequestKind(String),

    /// Structurally invalid request (zero sectors, wrong segment shape).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Caller buffer is smaller than the declared transfer length.
    #[error("buffer too short: need {needed} bytes, got {got}")]
    ShortBuffer { needed: usize, got: usize },

    /// `close()` on a device that has no openers.
    #[error("device is not open")]
    NotOpen,

    /// The backing store could not be allocated.
    #[error("cannot allocate {bytes} bytes of backing store")]
    AllocationFailure { bytes: u64 },

    /// Cipher key material was rejected by the cipher implementation.
    #[error("invalid cipher key: {0}")]
    InvalidKey(String),

    /// Configuration failed validation or could not be decoded.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VbdError {
    /// Convert this error into a POSIX errno suitable for completing a host
    /// block request.
    ///
    /// The mapping is exhaustive; adding a variant is a compile error until
    /// its errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::OutOfRange { .. } => libc::EIO,
            Self::UnalignedTransform { .. }
            | Self::InvalidRequest(_)
            | Self::ShortBuffer { .. }
            | Self::InvalidKey(_)
            | Self::InvalidConfig(_) => libc::EINVAL,
            Self::UnsupportedRequestKind(_) => libc::EOPNOTSUPP,
            Self::NotOpen => libc::ENXIO,
            Self::AllocationFailure { .. } => libc::ENOMEM,
        }
    }

    /// Whether the error only affects the request that produced it.
    #[must_use]
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. }
                | Self::UnalignedTransform { .. }
                | Self::UnsupportedRequestKind(_)
                | Self::InvalidRequest(_)
                | Self::ShortBuffer { .. }
        )
    }
}

/// Result alias using `VbdError`.
pub type Result<T> = std::result::Result<T, VbdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(VbdError, libc::c_int)> = vec![
            (VbdError::Io(std::io::Error::other("test")), libc::EIO),
            (
                VbdError::OutOfRange {
                    offset: 0,
                    len: 1,
                    capacity: 0,
                },
                libc::EIO,
            ),
            (
                VbdError::UnalignedTransform {
                    len: 20,
                    block_size: 16,
                },
                libc::EINVAL,
            ),
            (
                VbdError::UnsupportedRequestKind("flush".into()),
                libc::EOPNOTSUPP,
            ),
            (VbdError::InvalidRequest("test".into()), libc::EINVAL),
            (VbdError::ShortBuffer { needed: 2, got: 1 }, libc::EINVAL),
            (VbdError::NotOpen, libc::ENXIO),
            (VbdError::AllocationFailure { bytes: 1 }, libc::ENOMEM),
            (VbdError::InvalidKey("test".into()), libc::EINVAL),
            (VbdError::InvalidConfig("test".into()), libc::EINVAL),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(VbdError::Io(raw).to_errno(), libc::EACCES);
    }

    #[test]
    fn display_formatting() {
        let oob = VbdError::OutOfRange {
            offset: 523_264,
            len: 2048,
            capacity: 524_288,
        };
        assert_eq!(
            oob.to_string(),
            "span out of range: offset=523264 len=2048 capacity=524288"
        );

        let unaligned = VbdError::UnalignedTransform {
            len: 20,
            block_size: 16,
        };
        assert_eq!(
            unaligned.to_string(),
            "unaligned transform: len=20 is not a multiple of cipher block size 16"
        );

        assert_eq!(
            VbdError::UnsupportedRequestKind("flush".into()).to_string(),
            "unsupported request kind: flush"
        );
        assert_eq!(VbdError::NotOpen.to_string(), "device is not open");
    }

    #[test]
    fn request_scoped_errors_are_distinguished_from_fatal_ones() {
        assert!(
            VbdError::OutOfRange {
                offset: 0,
                len: 0,
                capacity: 0
            }
            .is_request_scoped()
        );
        assert!(VbdError::UnsupportedRequestKind("control".into()).is_request_scoped());
        assert!(!VbdError::AllocationFailure { bytes: 8 }.is_request_scoped());
        assert!(!VbdError::NotOpen.is_request_scoped());
    }
}
