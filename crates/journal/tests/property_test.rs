//! Property-based tests for row addressing and the shared/exclusive lock.

use alopex_journal::sync::Waiter;
use alopex_journal::{RowAddressing, SharedExclusiveLock};
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for a bit-hint and a valid (partition, local row) pair under it.
fn address_strategy() -> impl Strategy<Value = (u32, u64, u64)> {
    (1u32..=62).prop_flat_map(|bit_hint| {
        let max_local = (1u64 << bit_hint) - 1;
        let max_partition = (1u64 << (64 - bit_hint)) - 1;
        (
            Just(bit_hint),
            0..=max_partition.min(u32::MAX as u64),
            0..=max_local,
        )
    })
}

#[derive(Debug, Clone, Copy)]
enum LockOp {
    Read,
    Release,
    TryWrite,
}

fn lock_ops() -> impl Strategy<Value = Vec<LockOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(LockOp::Read),
            3 => Just(LockOp::Release),
            1 => Just(LockOp::TryWrite),
        ],
        0..200,
    )
}

proptest! {
    /// Composition and decomposition are inverses for every valid input.
    #[test]
    fn test_addressing_roundtrip((bit_hint, partition, local_row) in address_strategy()) {
        let addressing = RowAddressing::new(bit_hint).unwrap();
        let row_id = addressing.to_global_row_id(partition as usize, local_row).unwrap();
        prop_assert_eq!(addressing.to_partition_index(row_id), partition as usize);
        prop_assert_eq!(addressing.to_local_row_id(row_id), local_row);
    }

    /// Any local row id at or past 2^bit_hint is rejected.
    #[test]
    fn test_addressing_rejects_wide_local_rows(bit_hint in 1u32..=62, excess in 0u64..1_000) {
        let addressing = RowAddressing::new(bit_hint).unwrap();
        let local_row = (1u64 << bit_hint).saturating_add(excess);
        prop_assert!(addressing.to_global_row_id(0, local_row).is_err());
    }

    /// Without writers, read_refs always equals the number of outstanding readers,
    /// and a write only succeeds while there are none.
    #[test]
    fn test_reader_count_tracks_holders(ops in lock_ops()) {
        let lock = SharedExclusiveLock::new();
        let mut holders = 0i64;
        for op in ops {
            match op {
                LockOp::Read => {
                    let waiter = Arc::new(Waiter::new());
                    prop_assert!(lock.acquire_read(&waiter, false));
                    holders += 1;
                }
                LockOp::Release => {
                    let released = lock.release_read();
                    if holders > 0 {
                        prop_assert!(released.is_ok());
                        holders -= 1;
                    } else {
                        prop_assert!(released.is_err());
                    }
                }
                LockOp::TryWrite => {
                    let waiter = Arc::new(Waiter::new());
                    let granted = lock.acquire_write(&waiter, false);
                    prop_assert_eq!(granted, holders == 0);
                    if granted {
                        lock.release_write().unwrap();
                    }
                }
            }
            prop_assert_eq!(lock.read_refs(), holders);
            prop_assert_eq!(lock.queue_length(), 0);
        }
    }
}
