//! Partition storage.
//!
//! [`PartitionStorage`] is the contract the read and write paths use to talk
//! to one partition. [`MemoryPartition`] keeps committed column data in
//! memory and models open file handles as a per-column handle cache that can
//! be dropped when the partition goes idle and reopened on the next read.
//!
//! # Offload
//!
//! Closing handles takes the partition's [`SharedExclusiveLock`] in
//! non-queueing exclusive mode. Readers hold the lock in shared mode for as
//! long as they are bound to the partition, so an offload never runs under
//! an in-flight read; it is skipped instead.

use crate::error::{JournalError, Result};
use crate::journal::column::{ColumnChunks, ColumnData};
use crate::journal::schema::{ColumnMeta, Record, Value};
use crate::lifecycle::partition_by::{TimeRange, Timestamp};
use crate::lifecycle::scheduler::IdleState;
use crate::sync::SharedExclusiveLock;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Uncommitted rows appended to one partition within a write transaction.
#[derive(Debug)]
pub struct PartitionTx {
    columns: Vec<ColumnData>,
    rows: u64,
    max_timestamp: Option<Timestamp>,
}

impl PartitionTx {
    /// Creates an empty buffer with one column per schema column.
    pub fn new(columns: &[ColumnMeta]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|meta| ColumnData::new(meta.column_type))
                .collect(),
            rows: 0,
            max_timestamp: None,
        }
    }

    /// Number of buffered rows.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Returns true if nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// One partition as seen by readers, the writer and the offload scheduler.
pub trait PartitionStorage: Send + Sync {
    /// Position of the partition in the journal.
    fn partition_id(&self) -> usize;

    /// Human-readable partition name, e.g. `2013-03-15`.
    fn name(&self) -> &str;

    /// Inclusive start of the partition's time range.
    fn start_date(&self) -> Timestamp {
        self.range().start
    }

    /// Time range the partition covers.
    fn range(&self) -> TimeRange;

    /// Rows committed so far.
    fn committed_rows(&self) -> u64;

    /// Largest committed timestamp, if any row has been committed.
    fn max_timestamp(&self) -> Option<Timestamp>;

    /// Opens (or reuses) the handle for a column.
    ///
    /// A handle opened after [`commit`](Self::commit) returns covers every
    /// committed row.
    fn read_column(&self, column: usize) -> Result<Arc<ColumnChunks>>;

    /// Number of column handles currently open.
    fn open_handles(&self) -> usize;

    /// Closes open handles unless a reader holds the partition.
    ///
    /// Returns true if the handles were closed.
    fn try_close_files(&self) -> bool;

    /// Buffers a record in `tx`. Nothing becomes visible until [`commit`](Self::commit).
    fn append(&self, record: &Record, tx: &mut PartitionTx) -> Result<()>;

    /// Appends the buffered rows to the committed data and empties `tx`.
    ///
    /// Returns the number of rows committed. On error nothing is committed
    /// and `tx` keeps its rows.
    fn commit(&self, tx: &mut PartitionTx) -> Result<u64>;

    /// Lock coordinating readers with offload.
    fn lock(&self) -> &Arc<SharedExclusiveLock>;

    /// Idle signal bookkeeping used by the offload scheduler.
    fn idle_state(&self) -> &IdleState;
}

/// Counters for handle open/close activity.
#[derive(Debug, Default)]
pub struct PartitionStats {
    /// Column handles opened.
    pub handles_opened: AtomicU64,
    /// Successful offloads.
    pub offloads: AtomicU64,
    /// Offloads skipped because a reader held the partition.
    pub offloads_skipped: AtomicU64,
}

impl PartitionStats {
    /// Column handles opened so far.
    pub fn handles_opened(&self) -> u64 {
        self.handles_opened.load(Ordering::Relaxed)
    }

    /// Successful offloads so far.
    pub fn offloads(&self) -> u64 {
        self.offloads.load(Ordering::Relaxed)
    }

    /// Skipped offloads so far.
    pub fn offloads_skipped(&self) -> u64 {
        self.offloads_skipped.load(Ordering::Relaxed)
    }
}

/// In-memory partition with offloadable column handles.
pub struct MemoryPartition {
    id: usize,
    name: String,
    range: TimeRange,
    schema: Vec<ColumnMeta>,
    timestamp_column: usize,
    committed: RwLock<Vec<Arc<ColumnChunks>>>,
    handles: Mutex<Vec<Option<Arc<ColumnChunks>>>>,
    committed_rows: AtomicU64,
    max_timestamp: AtomicI64,
    lock: Arc<SharedExclusiveLock>,
    idle: IdleState,
    stats: PartitionStats,
}

impl fmt::Debug for MemoryPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPartition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("range", &self.range)
            .field("committed_rows", &self.committed_rows())
            .finish()
    }
}

impl MemoryPartition {
    /// Creates an empty partition.
    ///
    /// # Arguments
    ///
    /// * `id` - Position of the partition in the journal
    /// * `name` - Partition name used in logs
    /// * `range` - Time range covered
    /// * `schema` - Journal columns
    /// * `timestamp_column` - Index of the designated timestamp column
    pub fn new(
        id: usize,
        name: impl Into<String>,
        range: TimeRange,
        schema: &[ColumnMeta],
        timestamp_column: usize,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            range,
            schema: schema.to_vec(),
            timestamp_column,
            committed: RwLock::new(
                schema
                    .iter()
                    .map(|meta| Arc::new(ColumnChunks::new(meta.column_type)))
                    .collect(),
            ),
            handles: Mutex::new(vec![None; schema.len()]),
            committed_rows: AtomicU64::new(0),
            max_timestamp: AtomicI64::new(i64::MIN),
            lock: Arc::new(SharedExclusiveLock::new()),
            idle: IdleState::default(),
            stats: PartitionStats::default(),
        }
    }

    /// Handle activity counters.
    pub fn stats(&self) -> &PartitionStats {
        &self.stats
    }
}

impl PartitionStorage for MemoryPartition {
    fn partition_id(&self) -> usize {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn range(&self) -> TimeRange {
        self.range
    }

    fn committed_rows(&self) -> u64 {
        self.committed_rows.load(Ordering::Acquire)
    }

    fn max_timestamp(&self) -> Option<Timestamp> {
        if self.committed_rows() == 0 {
            return None;
        }
        Some(self.max_timestamp.load(Ordering::Acquire))
    }

    fn read_column(&self, column: usize) -> Result<Arc<ColumnChunks>> {
        let mut handles = self.handles.lock();
        let count = handles.len();
        let slot = handles
            .get_mut(column)
            .ok_or(JournalError::ColumnIndexOutOfRange {
                index: column,
                count,
            })?;
        if let Some(handle) = slot {
            return Ok(Arc::clone(handle));
        }

        let data = Arc::clone(&self.committed.read()[column]);
        *slot = Some(Arc::clone(&data));
        self.stats.handles_opened.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    fn open_handles(&self) -> usize {
        self.handles.lock().iter().filter(|h| h.is_some()).count()
    }

    fn try_close_files(&self) -> bool {
        let Some(_exclusive) = self.lock.try_write() else {
            self.stats.offloads_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(partition = %self.name, "offload skipped: partition in use");
            return false;
        };

        let mut handles = self.handles.lock();
        let closed = handles.iter().filter(|h| h.is_some()).count();
        handles.iter_mut().for_each(|h| *h = None);
        self.stats.offloads.fetch_add(1, Ordering::Relaxed);
        debug!(partition = %self.name, closed, "partition offloaded");
        true
    }

    fn append(&self, record: &Record, tx: &mut PartitionTx) -> Result<()> {
        if record.len() != self.schema.len() {
            return Err(JournalError::RecordArity {
                expected: self.schema.len(),
                actual: record.len(),
            });
        }
        for ((meta, column), value) in self
            .schema
            .iter()
            .zip(&tx.columns)
            .zip(record.values())
        {
            if !column.accepts(value) {
                return Err(JournalError::TypeMismatch {
                    column: meta.name.clone(),
                    requested: value.column_type().name(),
                    stored: meta.column_type,
                });
            }
        }

        for ((meta, column), value) in self
            .schema
            .iter()
            .zip(tx.columns.iter_mut())
            .zip(record.values())
        {
            column.push(&meta.name, value)?;
        }
        if let Some(Value::Timestamp(ts)) = record.get(self.timestamp_column) {
            tx.max_timestamp = Some(tx.max_timestamp.map_or(*ts, |max| max.max(*ts)));
        }
        tx.rows += 1;
        Ok(())
    }

    fn commit(&self, tx: &mut PartitionTx) -> Result<u64> {
        if tx.is_empty() {
            return Ok(0);
        }
        let mismatch = tx.columns.len() != self.schema.len()
            || self
                .schema
                .iter()
                .zip(&tx.columns)
                .any(|(meta, column)| column.column_type() != meta.column_type);
        if mismatch {
            return Err(JournalError::InvalidState(format!(
                "partition {} commit does not match its {} column schema",
                self.name,
                self.schema.len()
            )));
        }

        // Readers open handles under the same lock, so none can cache a
        // pre-commit column once the append is visible.
        let mut handles = self.handles.lock();
        {
            let mut committed = self.committed.write();
            for (column, pending) in committed.iter_mut().zip(tx.columns.iter_mut()) {
                Arc::make_mut(column).append(pending)?;
            }
        }
        handles.iter_mut().for_each(|h| *h = None);

        if let Some(ts) = tx.max_timestamp.take() {
            self.max_timestamp.fetch_max(ts, Ordering::AcqRel);
        }
        let rows = std::mem::take(&mut tx.rows);
        self.committed_rows.fetch_add(rows, Ordering::AcqRel);
        drop(handles);
        Ok(rows)
    }

    fn lock(&self) -> &Arc<SharedExclusiveLock> {
        &self.lock
    }

    fn idle_state(&self) -> &IdleState {
        &self.idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::schema::ColumnType;

    fn columns() -> Vec<ColumnMeta> {
        vec![
            ColumnMeta::new("sym", ColumnType::String),
            ColumnMeta::new("price", ColumnType::Double),
            ColumnMeta::new("timestamp", ColumnType::Timestamp),
        ]
    }

    fn partition() -> MemoryPartition {
        MemoryPartition::new(0, "1970-01-01", TimeRange::new(0, 1_000), &columns(), 2)
    }

    fn trade(sym: &str, price: f64, ts: i64) -> Record {
        Record::new(vec![
            Value::String(sym.to_string()),
            Value::Double(price),
            Value::Timestamp(ts),
        ])
    }

    #[test]
    fn test_append_invisible_until_commit() {
        let partition = partition();
        let mut tx = PartitionTx::new(&columns());
        partition.append(&trade("AAPL", 1.0, 10), &mut tx).unwrap();
        partition.append(&trade("MSFT", 2.0, 20), &mut tx).unwrap();

        assert_eq!(partition.committed_rows(), 0);
        assert!(partition.read_column(0).unwrap().is_empty());

        assert_eq!(partition.commit(&mut tx).unwrap(), 2);
        assert_eq!(partition.committed_rows(), 2);
        assert_eq!(partition.max_timestamp(), Some(20));
        assert_eq!(partition.read_column(1).unwrap().len(), 2);
    }

    #[test]
    fn test_append_rejects_bad_records() {
        let partition = partition();
        let mut tx = PartitionTx::new(&columns());

        let short = Record::new(vec![Value::String("AAPL".into())]);
        assert!(matches!(
            partition.append(&short, &mut tx),
            Err(JournalError::RecordArity { .. })
        ));

        let wrong = Record::new(vec![
            Value::String("AAPL".into()),
            Value::Int32(1),
            Value::Timestamp(1),
        ]);
        assert!(matches!(
            partition.append(&wrong, &mut tx),
            Err(JournalError::TypeMismatch { .. })
        ));
        assert!(tx.is_empty());
        assert!(tx.columns.iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_read_column_out_of_range() {
        let partition = partition();
        assert!(matches!(
            partition.read_column(3),
            Err(JournalError::ColumnIndexOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn test_offload_closes_and_reopens_handles() {
        let partition = partition();
        let mut tx = PartitionTx::new(&columns());
        partition.append(&trade("AAPL", 1.0, 10), &mut tx).unwrap();
        partition.commit(&mut tx).unwrap();

        partition.read_column(0).unwrap();
        partition.read_column(1).unwrap();
        assert_eq!(partition.open_handles(), 2);

        assert!(partition.try_close_files());
        assert_eq!(partition.open_handles(), 0);
        assert_eq!(partition.stats().offloads(), 1);

        let prices = partition.read_column(1).unwrap();
        assert_eq!(prices.read::<f64>(0), Some(1.0));
        assert_eq!(partition.stats().handles_opened(), 3);
    }

    #[test]
    fn test_offload_skipped_while_reader_bound() {
        let partition = partition();
        partition.read_column(0).unwrap();

        let guard = partition.lock().read_arc();
        assert!(!partition.try_close_files());
        assert_eq!(partition.open_handles(), 1);
        assert_eq!(partition.stats().offloads_skipped(), 1);

        drop(guard);
        assert!(partition.try_close_files());
        assert_eq!(partition.lock().read_refs(), 0);
    }

    #[test]
    fn test_old_handles_keep_pre_commit_view() {
        let partition = partition();
        let mut tx = PartitionTx::new(&columns());
        partition.append(&trade("AAPL", 1.0, 10), &mut tx).unwrap();
        partition.commit(&mut tx).unwrap();

        let before = partition.read_column(0).unwrap();
        let mut tx = PartitionTx::new(&columns());
        partition.append(&trade("MSFT", 2.0, 20), &mut tx).unwrap();
        partition.commit(&mut tx).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(partition.read_column(0).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_commit_keeps_buffer() {
        let partition = partition();
        let mut tx = PartitionTx::new(&[
            ColumnMeta::new("sym", ColumnType::String),
            ColumnMeta::new("price", ColumnType::Int64),
            ColumnMeta::new("timestamp", ColumnType::Timestamp),
        ]);
        tx.columns[0].push("sym", &Value::String("AAPL".into())).unwrap();
        tx.columns[1].push("price", &Value::Int64(1)).unwrap();
        tx.columns[2].push("timestamp", &Value::Timestamp(1)).unwrap();
        tx.rows = 1;

        assert!(matches!(
            partition.commit(&mut tx),
            Err(JournalError::InvalidState(_))
        ));
        assert_eq!(tx.rows(), 1);
        assert_eq!(partition.committed_rows(), 0);
        assert!(partition.read_column(0).unwrap().is_empty());
    }

    #[test]
    fn test_commit_never_leaves_stale_handles() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let partition = Arc::new(partition());
        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let partition = Arc::clone(&partition);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        partition.read_column(0).unwrap();
                    }
                })
            })
            .collect();

        for i in 0..2_000 {
            let mut tx = PartitionTx::new(&columns());
            partition.append(&trade("AAPL", 1.0, i), &mut tx).unwrap();
            partition.commit(&mut tx).unwrap();
            assert!(tx.is_empty());
            let handle = partition.read_column(0).unwrap();
            assert_eq!(handle.len() as u64, partition.committed_rows());
        }

        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
