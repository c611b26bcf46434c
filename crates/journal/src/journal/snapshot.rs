//! Read transactions over immutable journal snapshots.
//!
//! A snapshot is captured eagerly: opening a [`ReadTx`] clones the `Arc` of
//! the most recently published [`JournalSnapshot`], which lists every visible
//! partition together with its committed row count at publish time. Commits
//! publish a new snapshot and never mutate an old one, so a transaction keeps
//! seeing exactly the rows that were committed when it was opened.

use crate::config::JournalConfig;
use crate::error::{JournalError, Result};
use crate::journal::addressing::RowAddressing;
use crate::journal::binding::PartitionBinding;
use crate::journal::record_set::RecordSet;
use crate::journal::schema::JournalMetadata;
use crate::journal::storage::PartitionStorage;
use crate::journal::JournalShared;
use crate::lifecycle::partition_by::{TimeRange, Timestamp};
use crate::lifecycle::scheduler::DeferredTaskScheduler;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One partition as it was when a snapshot was published.
#[derive(Clone)]
pub struct PartitionView {
    /// The partition.
    pub partition: Arc<dyn PartitionStorage>,
    /// Committed rows at publish time.
    pub visible_rows: u64,
}

impl fmt::Debug for PartitionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionView")
            .field("partition", &self.partition.name())
            .field("visible_rows", &self.visible_rows)
            .finish()
    }
}

/// Immutable list of visible partitions and their row counts.
#[derive(Debug, Clone, Default)]
pub struct JournalSnapshot {
    /// Visible partitions in index order.
    pub partitions: Vec<PartitionView>,
    /// Incremented on every publish.
    pub version: u64,
}

impl JournalSnapshot {
    /// Total rows visible across all partitions.
    pub fn row_count(&self) -> u64 {
        self.partitions.iter().map(|view| view.visible_rows).sum()
    }
}

/// Snapshot-isolated read transaction.
///
/// Owned by one thread. The column-name cache and any bindings created from
/// the transaction are not shared.
///
/// # Examples
/// ```rust,ignore
/// let tx = journal.read_tx();
/// let bid = tx.column_index("bid")?;
/// let mut records = tx.record_set(tx.row_ids());
/// for row_id in tx.row_ids() {
///     let price: f64 = records.get(row_id, bid)?;
/// }
/// ```
pub struct ReadTx {
    shared: Arc<JournalShared>,
    snapshot: Arc<JournalSnapshot>,
    column_cache: RefCell<HashMap<String, usize>>,
}

impl fmt::Debug for ReadTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTx")
            .field("version", &self.snapshot.version)
            .field("partitions", &self.snapshot.partitions.len())
            .finish()
    }
}

impl ReadTx {
    pub(crate) fn new(shared: Arc<JournalShared>) -> Self {
        let snapshot = Arc::clone(&*shared.snapshot.read());
        Self {
            shared,
            snapshot,
            column_cache: RefCell::new(HashMap::new()),
        }
    }

    /// The snapshot this transaction reads.
    pub fn snapshot(&self) -> &Arc<JournalSnapshot> {
        &self.snapshot
    }

    /// Snapshot version.
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    /// Number of partitions visible to the transaction.
    pub fn partition_count(&self) -> usize {
        self.snapshot.partitions.len()
    }

    /// Number of rows visible to the transaction.
    pub fn row_count(&self) -> u64 {
        self.snapshot.row_count()
    }

    /// All visible row ids in partition then row order.
    ///
    /// The returned iterator is `Clone`, so it can be restarted.
    pub fn row_ids(&self) -> RowIds {
        RowIds {
            addressing: self.shared.addressing,
            snapshot: Arc::clone(&self.snapshot),
            partition: 0,
            local_row: 0,
        }
    }

    /// Resolves a column name to its index.
    ///
    /// The first lookup of a name goes to the journal metadata; the result is
    /// memoized for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ColumnNotFound`] if the metadata does not know
    /// the name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        if let Some(index) = self.column_cache.borrow().get(name) {
            return Ok(*index);
        }
        let index = self
            .shared
            .metadata
            .column_id(name)
            .ok_or_else(|| JournalError::ColumnNotFound(name.to_string()))?;
        self.column_cache
            .borrow_mut()
            .insert(name.to_string(), index);
        Ok(index)
    }

    /// Binds the partition at `index`, blocking while it is being offloaded.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::PartitionOutOfRange`] if the snapshot has no
    /// such partition.
    pub fn bind_partition(&self, index: usize) -> Result<PartitionBinding<'_>> {
        let view = self
            .snapshot
            .partitions
            .get(index)
            .ok_or(JournalError::PartitionOutOfRange {
                partition: index,
                visible: self.snapshot.partitions.len(),
            })?;
        Ok(PartitionBinding::new(
            self,
            index,
            Arc::clone(&view.partition),
            view.visible_rows,
        ))
    }

    /// Creates a record set over `ids`.
    pub fn record_set<I>(&self, ids: I) -> RecordSet<'_, I>
    where
        I: IntoIterator<Item = u64> + Clone,
    {
        RecordSet::new(self, ids)
    }

    /// Row ids of visible rows with `from <= timestamp < to`, in order.
    ///
    /// Partitions outside the range are skipped without being bound. Within a
    /// partition the timestamp column is binary searched, which relies on
    /// timestamps being appended in non-decreasing order.
    pub fn row_ids_between(&self, from: Timestamp, to: Timestamp) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        if from >= to {
            return Ok(ids);
        }
        let query = TimeRange::new(from, to);
        let timestamp_column = self.shared.metadata.timestamp_column();

        for (index, view) in self.snapshot.partitions.iter().enumerate() {
            if view.visible_rows == 0 || !view.partition.range().overlaps(&query) {
                continue;
            }
            let binding = self.bind_partition(index)?;
            let data = binding.column_data(timestamp_column)?;
            let visible = (view.visible_rows as usize).min(data.len());
            let mismatch = || JournalError::TypeMismatch {
                column: format!("#{}", timestamp_column),
                requested: "timestamp",
                stored: data.column_type(),
            };
            let lo = data
                .timestamp_partition_point(visible, |ts| ts < from)
                .ok_or_else(mismatch)?;
            let hi = data
                .timestamp_partition_point(visible, |ts| ts < to)
                .ok_or_else(mismatch)?;
            for local_row in lo..hi {
                ids.push(self.shared.addressing.to_global_row_id(index, local_row as u64)?);
            }
        }
        Ok(ids)
    }

    pub(crate) fn metadata(&self) -> &dyn JournalMetadata {
        self.shared.metadata.as_ref()
    }

    pub(crate) fn addressing(&self) -> RowAddressing {
        self.shared.addressing
    }

    pub(crate) fn config(&self) -> &JournalConfig {
        &self.shared.config
    }

    pub(crate) fn scheduler(&self) -> &DeferredTaskScheduler {
        &self.shared.scheduler
    }
}

/// Restartable iterator over the row ids of a snapshot.
#[derive(Debug, Clone)]
pub struct RowIds {
    addressing: RowAddressing,
    snapshot: Arc<JournalSnapshot>,
    partition: usize,
    local_row: u64,
}

impl Iterator for RowIds {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            let view = self.snapshot.partitions.get(self.partition)?;
            if self.local_row < view.visible_rows {
                let row_id = self
                    .addressing
                    .to_global_row_id(self.partition, self.local_row)
                    .ok()?;
                self.local_row += 1;
                return Some(row_id);
            }
            self.partition += 1;
            self.local_row = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining: u64 = self
            .snapshot
            .partitions
            .iter()
            .skip(self.partition)
            .map(|view| view.visible_rows)
            .sum::<u64>()
            .saturating_sub(self.local_row);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}
