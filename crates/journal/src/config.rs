//! Journal configuration.

use crate::error::{JournalError, Result};
use crate::lifecycle::partition_by::PartitionBy;
use std::time::Duration;

/// Default number of low row-id bits reserved for the local row offset.
pub const DEFAULT_BIT_HINT: u32 = 40;

/// Default quiet period before an idle partition's files are closed: 60 seconds.
pub const DEFAULT_OFFLOAD_TTL_MS: i64 = 60_000;

/// Default poll interval of the deferred task scheduler: 100 ms.
pub const DEFAULT_SCHEDULER_LATENCY: Duration = Duration::from_millis(100);

/// Largest accepted bit-hint. Leaves at least one bit for the partition index.
pub const MAX_BIT_HINT: u32 = 62;

/// Configuration for a [`Journal`](crate::journal::Journal).
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Bits of a global row id reserved for the in-partition row offset.
    ///
    /// Default: 40.
    pub bit_hint: u32,

    /// Calendar period covered by each partition.
    ///
    /// Default: [`PartitionBy::Day`].
    pub partition_by: PartitionBy,

    /// Quiet period after which an idle partition's files are closed.
    ///
    /// Negative disables offloading. Default: 60 seconds.
    pub offload_ttl_ms: i64,

    /// Poll interval the scheduler re-arms with while work is pending.
    ///
    /// Default: 100 ms.
    pub scheduler_latency: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            bit_hint: DEFAULT_BIT_HINT,
            partition_by: PartitionBy::Day,
            offload_ttl_ms: DEFAULT_OFFLOAD_TTL_MS,
            scheduler_latency: DEFAULT_SCHEDULER_LATENCY,
        }
    }
}

impl JournalConfig {
    /// Sets the row-id bit-hint.
    pub fn with_bit_hint(mut self, bit_hint: u32) -> Self {
        self.bit_hint = bit_hint;
        self
    }

    /// Sets the partition period.
    pub fn with_partition_by(mut self, partition_by: PartitionBy) -> Self {
        self.partition_by = partition_by;
        self
    }

    /// Sets the offload TTL in milliseconds. Negative disables offloading.
    pub fn with_offload_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.offload_ttl_ms = ttl_ms;
        self
    }

    /// Sets the scheduler poll interval.
    pub fn with_scheduler_latency(mut self, latency: Duration) -> Self {
        self.scheduler_latency = latency;
        self
    }

    /// Checks the configuration for values the journal cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bit_hint == 0 || self.bit_hint > MAX_BIT_HINT {
            return Err(JournalError::InvalidConfig(format!(
                "bit_hint must be in 1..={}, got {}",
                MAX_BIT_HINT, self.bit_hint
            )));
        }
        if self.scheduler_latency.is_zero() {
            return Err(JournalError::InvalidConfig(
                "scheduler_latency must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = JournalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bit_hint, DEFAULT_BIT_HINT);
        assert_eq!(config.partition_by, PartitionBy::Day);
    }

    #[test]
    fn test_bit_hint_bounds() {
        assert!(JournalConfig::default().with_bit_hint(0).validate().is_err());
        assert!(JournalConfig::default().with_bit_hint(63).validate().is_err());
        assert!(JournalConfig::default().with_bit_hint(1).validate().is_ok());
        assert!(JournalConfig::default()
            .with_bit_hint(MAX_BIT_HINT)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_zero_latency_rejected() {
        let config = JournalConfig::default().with_scheduler_latency(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(JournalError::InvalidConfig(_))
        ));
    }
}
