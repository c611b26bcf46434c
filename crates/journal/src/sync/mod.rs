//! Synchronization primitives for partition lifecycle coordination.

pub mod shared_lock;

pub use shared_lock::{
    ArcSharedGuard, ExclusiveGuard, SharedExclusiveLock, SharedGuard, WaitSignal, Waiter,
};
