//! Partitioned columnar journal.
//!
//! # Architecture
//!
//! ```text
//!            ┌────────────── Journal ───────────────┐
//!            │  snapshot: RwLock<Arc<JournalSnapshot>>
//!            │  writer permit · scheduler · metadata │
//!            └───────┬──────────────────────┬────────┘
//!        read_tx()   │                      │ writer()
//!                    ▼                      ▼
//!     ReadTx (Arc<JournalSnapshot>)      Writer ── commit ──▶ publish snapshot
//!        │                                  │
//!        ▼                                  ▼
//!     RecordSet ── PartitionBinding ──▶ PartitionStorage ◀── append
//!                   (shared lock hold)      ▲
//!                                           │ try_close_files (exclusive)
//!                               DeferredTaskScheduler
//! ```
//!
//! Readers never block the writer and the writer never blocks readers. The
//! only lock on the read path is the partition's shared/exclusive lock, which
//! keeps an offload from closing a partition that a reader is bound to.

pub mod addressing;
pub mod binding;
pub mod column;
pub mod record_set;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod writer;

pub use addressing::RowAddressing;
pub use binding::PartitionBinding;
pub use column::{ColumnChunks, ColumnData, ColumnValue, CHUNK_ROWS};
pub use record_set::{RecordCursor, RecordSet};
pub use schema::{ColumnMeta, ColumnType, JournalMetadata, Record, Schema, TimestampReader, Value};
pub use snapshot::{JournalSnapshot, PartitionView, ReadTx, RowIds};
pub use storage::{MemoryPartition, PartitionStats, PartitionStorage, PartitionTx};
pub use writer::{WritePermit, Writer};

use crate::config::JournalConfig;
use crate::error::{JournalError, Result};
use crate::lifecycle::scheduler::DeferredTaskScheduler;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// State shared by the journal handle, read transactions and the writer.
pub(crate) struct JournalShared {
    pub(crate) config: JournalConfig,
    pub(crate) addressing: RowAddressing,
    pub(crate) metadata: Arc<dyn JournalMetadata>,
    pub(crate) snapshot: RwLock<Arc<JournalSnapshot>>,
    pub(crate) writer_active: AtomicBool,
    pub(crate) scheduler: DeferredTaskScheduler,
}

/// Handle to an open journal. Cheap to clone.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::{Journal, JournalConfig};
/// use alopex_journal::journal::{ColumnMeta, ColumnType, Schema};
/// use std::sync::Arc;
///
/// let schema = Schema::new(
///     vec![
///         ColumnMeta::new("sym", ColumnType::String),
///         ColumnMeta::new("bid", ColumnType::Double),
///         ColumnMeta::new("timestamp", ColumnType::Timestamp),
///     ],
///     "timestamp",
/// )?;
/// let journal = Journal::open(JournalConfig::default(), Arc::new(schema))?;
/// ```
#[derive(Clone)]
pub struct Journal {
    shared: Arc<JournalShared>,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("config", &self.shared.config)
            .field("partitions", &self.partition_count())
            .field("writer_active", &self.has_writer())
            .finish()
    }
}

impl Journal {
    /// Opens an empty journal with a timer-driven scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] for a bad configuration or
    /// metadata, or an I/O error if the scheduler thread cannot start.
    pub fn open(config: JournalConfig, metadata: Arc<dyn JournalMetadata>) -> Result<Self> {
        config.validate()?;
        let scheduler = DeferredTaskScheduler::new(config.scheduler_latency)?;
        Self::with_scheduler(config, metadata, scheduler)
    }

    /// Opens an empty journal driven by the given scheduler.
    ///
    /// Pass a [`DeferredTaskScheduler::manual`] scheduler to run offloads
    /// deterministically.
    pub fn with_scheduler(
        config: JournalConfig,
        metadata: Arc<dyn JournalMetadata>,
        scheduler: DeferredTaskScheduler,
    ) -> Result<Self> {
        config.validate()?;
        let addressing = RowAddressing::new(config.bit_hint)?;

        let timestamp_column = metadata.timestamp_column();
        match metadata.column(timestamp_column) {
            Some(meta) if meta.column_type == ColumnType::Timestamp => {}
            Some(meta) => {
                return Err(JournalError::InvalidConfig(format!(
                    "timestamp column {} has type {}",
                    meta.name, meta.column_type
                )))
            }
            None => {
                return Err(JournalError::InvalidConfig(format!(
                    "timestamp column index {} outside {} columns",
                    timestamp_column,
                    metadata.columns().len()
                )))
            }
        }

        debug!(
            bit_hint = config.bit_hint,
            partition_by = %config.partition_by,
            columns = metadata.columns().len(),
            "journal opened"
        );
        Ok(Self {
            shared: Arc::new(JournalShared {
                config,
                addressing,
                metadata,
                snapshot: RwLock::new(Arc::new(JournalSnapshot::default())),
                writer_active: AtomicBool::new(false),
                scheduler,
            }),
        })
    }

    /// Opens a read transaction over the latest committed snapshot.
    pub fn read_tx(&self) -> ReadTx {
        ReadTx::new(Arc::clone(&self.shared))
    }

    /// Takes the journal's write permit and returns a writer.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::WriterBusy`] while another writer is open.
    pub fn writer(&self) -> Result<Writer> {
        Writer::new(Arc::clone(&self.shared))
    }

    /// Returns true while a writer holds the permit.
    pub fn has_writer(&self) -> bool {
        self.shared.writer_active.load(Ordering::Acquire)
    }

    /// Scheduler used for partition offload.
    pub fn scheduler(&self) -> &DeferredTaskScheduler {
        &self.shared.scheduler
    }

    /// Journal configuration.
    pub fn config(&self) -> &JournalConfig {
        &self.shared.config
    }

    /// Journal metadata.
    pub fn metadata(&self) -> &Arc<dyn JournalMetadata> {
        &self.shared.metadata
    }

    /// Row id addressing for this journal's bit-hint.
    pub fn addressing(&self) -> RowAddressing {
        self.shared.addressing
    }

    /// Number of partitions in the latest committed snapshot.
    pub fn partition_count(&self) -> usize {
        self.shared.snapshot.read().partitions.len()
    }

    /// Partitions in the latest committed snapshot.
    pub fn partitions(&self) -> Vec<Arc<dyn PartitionStorage>> {
        self.shared
            .snapshot
            .read()
            .partitions
            .iter()
            .map(|view| Arc::clone(&view.partition))
            .collect()
    }

    /// Stops the scheduler. Pending offloads are dropped.
    ///
    /// Read transactions and writers keep working; idle signals are ignored.
    pub fn close(&self) {
        self.shared.scheduler.soft_stop();
        self.shared.scheduler.dispose();
    }
}
