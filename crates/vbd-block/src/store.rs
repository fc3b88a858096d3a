//! Fixed-capacity in-memory backing store.

use std::ops::Range;
use vbd_error::{Result, VbdError};
use vbd_types::ByteOffset;

/// Owned byte buffer holding the device contents.
///
/// Invariant: `data.len() == capacity` for the store's whole lifetime.
/// Every access is bounds-checked before a byte moves, so a rejected span
/// leaves the store untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingStore {
    data: Vec<u8>,
}

impl BackingStore {
    /// Allocate a zero-filled store of `capacity_bytes`.
    ///
    /// Allocation is fallible: an oversize request returns
    /// `AllocationFailure` instead of aborting the process.
    pub fn new(capacity_bytes: u64) -> Result<Self> {
        if capacity_bytes == 0 {
            return Err(VbdError::InvalidConfig(
                "backing store capacity must be > 0".to_owned(),
            ));
        }
        let len = usize::try_from(capacity_bytes).map_err(|_| VbdError::AllocationFailure {
            bytes: capacity_bytes,
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| VbdError::AllocationFailure {
                bytes: capacity_bytes,
            })?;
        data.resize(len, 0);
        Ok(Self { data })
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read_span(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    /// Overwrite the span starting at `offset` with `bytes`.
    pub fn write_span(&mut self, offset: ByteOffset, bytes: &[u8]) -> Result<()> {
        let range = self.range(offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow the raw stored bytes of a span.
    pub fn span(&self, offset: ByteOffset, len: usize) -> Result<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.data[range])
    }

    /// Zero-fill the entire store.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    fn range(&self, offset: ByteOffset, len: usize) -> Result<Range<usize>> {
        let capacity = self.capacity();
        let out_of_range = || VbdError::OutOfRange {
            offset: offset.0,
            len: len as u64,
            capacity,
        };
        let end = offset.checked_add(len as u64).ok_or_else(out_of_range)?;
        if end.0 > capacity {
            return Err(out_of_range());
        }
        // Both ends are <= capacity, which came from a usize.
        let start = usize::try_from(offset.0).map_err(|_| out_of_range())?;
        Ok(start..start + len)
    }
}
