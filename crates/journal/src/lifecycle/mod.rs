//! Lifecycle management: partition periods and deferred maintenance.

pub mod partition_by;
pub mod scheduler;

pub use partition_by::{PartitionBy, TimeRange, Timestamp};
pub use scheduler::{Clock, DeferredTaskScheduler, IdleState, ManualClock, SystemClock};
