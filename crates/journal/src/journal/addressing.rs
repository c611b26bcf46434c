//! Global row id encoding.
//!
//! A global row id packs a partition index and a local row offset into one
//! `u64`:
//!
//! ```text
//! | partition index (64 - bit_hint bits) | local row id (bit_hint bits) |
//! ```

use crate::config::MAX_BIT_HINT;
use crate::error::{JournalError, Result};

/// Pure mapping between global row ids and `(partition, local row)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowAddressing {
    bit_hint: u32,
    local_mask: u64,
}

impl RowAddressing {
    /// Creates the addressing scheme for `bit_hint` local-row bits.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] unless `1 <= bit_hint <= 62`.
    pub fn new(bit_hint: u32) -> Result<Self> {
        if bit_hint == 0 || bit_hint > MAX_BIT_HINT {
            return Err(JournalError::InvalidConfig(format!(
                "bit_hint must be in 1..={}, got {}",
                MAX_BIT_HINT, bit_hint
            )));
        }
        Ok(Self {
            bit_hint,
            local_mask: (1u64 << bit_hint) - 1,
        })
    }

    /// Bits reserved for the local row id.
    pub fn bit_hint(&self) -> u32 {
        self.bit_hint
    }

    /// Number of local row ids one partition can address.
    pub fn max_local_rows(&self) -> u64 {
        1u64 << self.bit_hint
    }

    /// Number of partitions the remaining high bits can address.
    pub fn max_partitions(&self) -> u64 {
        1u64 << (64 - self.bit_hint)
    }

    /// Partition index encoded in `row_id`.
    #[inline]
    pub fn to_partition_index(&self, row_id: u64) -> usize {
        (row_id >> self.bit_hint) as usize
    }

    /// Local row offset encoded in `row_id`.
    #[inline]
    pub fn to_local_row_id(&self, row_id: u64) -> u64 {
        row_id & self.local_mask
    }

    /// Encodes a partition index and local row offset.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::LocalRowIdOutOfRange`] if `local_row` does not
    /// fit in the bit-hint, or [`JournalError::PartitionIndexOutOfRange`] if
    /// `partition` does not fit above it.
    #[inline]
    pub fn to_global_row_id(&self, partition: usize, local_row: u64) -> Result<u64> {
        if local_row > self.local_mask {
            return Err(JournalError::LocalRowIdOutOfRange {
                local_row,
                bit_hint: self.bit_hint,
            });
        }
        if partition as u64 >= self.max_partitions() {
            return Err(JournalError::PartitionIndexOutOfRange {
                partition,
                bit_hint: self.bit_hint,
            });
        }
        Ok(((partition as u64) << self.bit_hint) | local_row)
    }
}
