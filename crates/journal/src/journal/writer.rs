//! Single-writer append and commit path.

use crate::error::{JournalError, Result};
use crate::journal::schema::{Record, TimestampReader};
use crate::journal::snapshot::{JournalSnapshot, PartitionView};
use crate::journal::storage::{MemoryPartition, PartitionStorage, PartitionTx};
use crate::journal::JournalShared;
use crate::lifecycle::partition_by::Timestamp;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Exclusive right to write to a journal.
///
/// At most one permit per journal exists at a time. Released exactly once,
/// either through [`release`](Self::release) or on drop.
pub struct WritePermit {
    shared: Arc<JournalShared>,
    released: AtomicBool,
}

impl fmt::Debug for WritePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePermit")
            .field("released", &self.is_released())
            .finish()
    }
}

impl WritePermit {
    pub(crate) fn acquire(shared: &Arc<JournalShared>) -> Result<Self> {
        shared
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| JournalError::WriterBusy)?;
        Ok(Self {
            shared: Arc::clone(shared),
            released: AtomicBool::new(false),
        })
    }

    /// Gives the permit back. Returns false if it was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.writer_active.store(false, Ordering::Release);
        true
    }

    /// Returns true once the permit has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.release();
    }
}

/// Appends records and publishes them on commit.
///
/// Records must arrive with non-decreasing timestamps. Each record is routed
/// to the partition whose range covers its timestamp; a timestamp past the
/// last partition's range opens a new partition. Appends stay invisible to
/// readers until [`commit`](Self::commit), and only transactions opened after
/// the commit returns see them.
///
/// # Examples
/// ```rust,ignore
/// let mut writer = journal.writer()?;
/// writer.append(&quote)?;
/// writer.commit()?;
/// writer.close();
/// ```
pub struct Writer {
    shared: Arc<JournalShared>,
    permit: WritePermit,
    timestamp_reader: TimestampReader,
    partitions: Vec<Arc<dyn PartitionStorage>>,
    committed_partitions: usize,
    pending: BTreeMap<usize, PartitionTx>,
    last_timestamp: Option<Timestamp>,
    committed_last_timestamp: Option<Timestamp>,
    closed: bool,
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("partitions", &self.partitions.len())
            .field("pending_rows", &self.pending_rows())
            .field("last_timestamp", &self.last_timestamp)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Writer {
    pub(crate) fn new(shared: Arc<JournalShared>) -> Result<Self> {
        let permit = WritePermit::acquire(&shared)?;
        let snapshot = Arc::clone(&*shared.snapshot.read());
        let partitions: Vec<Arc<dyn PartitionStorage>> = snapshot
            .partitions
            .iter()
            .map(|view| Arc::clone(&view.partition))
            .collect();
        let last_timestamp = partitions.iter().rev().find_map(|p| p.max_timestamp());
        let timestamp_reader = shared.metadata.timestamp_reader();

        Ok(Self {
            shared,
            permit,
            timestamp_reader,
            committed_partitions: partitions.len(),
            partitions,
            pending: BTreeMap::new(),
            last_timestamp,
            committed_last_timestamp: last_timestamp,
            closed: false,
        })
    }

    /// Buffers one record.
    ///
    /// Returns the row id the record will have once committed.
    ///
    /// # Errors
    ///
    /// - [`JournalError::Disposed`] after [`close`](Self::close)
    /// - [`JournalError::OutOfOrderTimestamp`] if the timestamp is earlier than
    ///   the last appended one
    /// - [`JournalError::RecordArity`] / [`JournalError::TypeMismatch`] for
    ///   records that do not fit the schema
    /// - [`JournalError::LocalRowIdOutOfRange`] /
    ///   [`JournalError::PartitionIndexOutOfRange`] when the bit-hint cannot
    ///   address the new row
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        self.ensure_open()?;
        let timestamp = self.timestamp_reader.read(record)?;
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(JournalError::OutOfOrderTimestamp { timestamp, last });
            }
        }

        let addressing = self.shared.addressing;
        let columns = self.shared.metadata.columns();
        let head = self.partitions.len().checked_sub(1);

        let row_id = match head {
            Some(index) if self.partitions[index].range().contains(timestamp) => {
                let partition = &self.partitions[index];
                let tx = self
                    .pending
                    .entry(index)
                    .or_insert_with(|| PartitionTx::new(columns));
                let row_id =
                    addressing.to_global_row_id(index, partition.committed_rows() + tx.rows())?;
                partition.append(record, tx)?;
                row_id
            }
            _ => {
                let index = self.partitions.len();
                let row_id = addressing.to_global_row_id(index, 0)?;
                let partition = self.open_partition(index, timestamp);
                let mut tx = PartitionTx::new(columns);
                partition.append(record, &mut tx)?;
                debug!(partition = %partition.name(), index, "opened partition");
                self.partitions.push(partition);
                self.pending.insert(index, tx);
                row_id
            }
        };

        self.last_timestamp = Some(timestamp);
        Ok(row_id)
    }

    /// Buffers records in order, stopping at the first failure.
    ///
    /// Records appended before the failure stay buffered. Returns the number
    /// of records appended.
    pub fn append_batch<I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<Record>,
    {
        let mut appended = 0;
        for record in records {
            self.append(record.borrow())?;
            appended += 1;
        }
        Ok(appended)
    }

    /// Makes buffered rows visible to read transactions opened from now on.
    ///
    /// Every non-head partition touched by the commit is signaled idle to the
    /// scheduler. Returns the number of rows committed.
    ///
    /// # Errors
    ///
    /// If a partition rejects its rows, the partitions committed before it
    /// are still published and every buffer from the failing partition on
    /// stays pending, so the caller can retry or [`rollback`](Self::rollback).
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_open()?;
        if self.pending.is_empty() {
            return Ok(0);
        }

        let mut touched = Vec::with_capacity(self.pending.len());
        let mut rows = 0;
        let mut failure = None;
        for (&index, tx) in self.pending.iter_mut() {
            match self.partitions[index].commit(tx) {
                Ok(committed) => {
                    rows += committed;
                    touched.push(index);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        for index in &touched {
            self.pending.remove(index);
        }

        // Only partitions with committed rows are published; the first still
        // pending one and everything after it stay with the writer.
        let published = match self.pending.keys().next() {
            Some(&first_pending) if failure.is_some() => first_pending,
            _ => self.partitions.len(),
        };
        let version = self.publish(published);
        self.committed_partitions = published;
        self.committed_last_timestamp = if failure.is_none() {
            self.last_timestamp
        } else {
            self.partitions[..published]
                .iter()
                .rev()
                .find_map(|p| p.max_timestamp())
        };

        let ttl_ms = self.shared.config.offload_ttl_ms;
        for index in touched.into_iter().filter(|i| i + 1 < published) {
            let partition = Arc::clone(&self.partitions[index]);
            if let Err(err) = self.shared.scheduler.signal_partition_idle(partition, ttl_ms) {
                debug!(index, "idle signal dropped: {}", err);
            }
        }

        if let Some(err) = failure {
            debug!(rows, version, "writer commit stopped: {}", err);
            return Err(err);
        }
        debug!(
            rows,
            partitions = self.partitions.len(),
            version,
            "writer commit"
        );
        Ok(rows)
    }

    /// Discards everything appended since the last commit, including
    /// partitions opened for it. Returns the number of rows discarded.
    pub fn rollback(&mut self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.discard())
    }

    /// Rolls back pending rows and releases the write permit.
    ///
    /// Safe to call more than once. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let discarded = self.discard();
        if discarded > 0 {
            debug!(discarded, "writer closed with uncommitted rows");
        }
        self.closed = true;
        self.permit.release();
        true
    }

    /// Rows buffered and not yet committed.
    pub fn pending_rows(&self) -> u64 {
        self.pending.values().map(PartitionTx::rows).sum()
    }

    /// Partitions known to the writer, including uncommitted ones.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Timestamp of the last appended record.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(JournalError::Disposed("writer"));
        }
        Ok(())
    }

    fn publish(&self, partitions: usize) -> u64 {
        let mut current = self.shared.snapshot.write();
        let version = current.version + 1;
        *current = Arc::new(JournalSnapshot {
            partitions: self.partitions[..partitions]
                .iter()
                .map(|partition| PartitionView {
                    partition: Arc::clone(partition),
                    visible_rows: partition.committed_rows(),
                })
                .collect(),
            version,
        });
        version
    }

    fn discard(&mut self) -> u64 {
        let rows = self.pending_rows();
        self.pending.clear();
        self.partitions.truncate(self.committed_partitions);
        self.last_timestamp = self.committed_last_timestamp;
        rows
    }

    fn open_partition(&self, index: usize, timestamp: Timestamp) -> Arc<dyn PartitionStorage> {
        let policy = self.shared.config.partition_by;
        let range = policy.range_for(timestamp);
        Arc::new(MemoryPartition::new(
            index,
            policy.name_for(range.start),
            range,
            self.shared.metadata.columns(),
            self.shared.metadata.timestamp_column(),
        ))
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.close();
    }
}
