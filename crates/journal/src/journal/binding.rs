//! Per-transaction binding to one partition.

use crate::error::{JournalError, Result};
use crate::journal::column::{ColumnChunks, ColumnValue};
use crate::journal::snapshot::ReadTx;
use crate::journal::storage::PartitionStorage;
use crate::sync::ArcSharedGuard;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One partition bound to a read transaction.
///
/// Holds the partition's lock in shared mode for its whole lifetime, so the
/// partition cannot be offloaded while values are being read through it.
/// Column handles are opened lazily and kept for the life of the binding.
pub struct PartitionBinding<'tx> {
    tx: &'tx ReadTx,
    index: usize,
    partition: Arc<dyn PartitionStorage>,
    visible_rows: u64,
    columns: RefCell<Vec<Option<Arc<ColumnChunks>>>>,
    _read_hold: ArcSharedGuard,
}

impl fmt::Debug for PartitionBinding<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionBinding")
            .field("index", &self.index)
            .field("partition", &self.partition.name())
            .field("visible_rows", &self.visible_rows)
            .finish()
    }
}

impl<'tx> PartitionBinding<'tx> {
    pub(crate) fn new(
        tx: &'tx ReadTx,
        index: usize,
        partition: Arc<dyn PartitionStorage>,
        visible_rows: u64,
    ) -> Self {
        let read_hold = partition.lock().read_arc();
        let column_count = tx.metadata().columns().len();
        Self {
            tx,
            index,
            partition,
            visible_rows,
            columns: RefCell::new(vec![None; column_count]),
            _read_hold: read_hold,
        }
    }

    /// Partition index within the transaction's snapshot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The bound partition.
    pub fn partition(&self) -> &Arc<dyn PartitionStorage> {
        &self.partition
    }

    /// Rows of this partition visible to the transaction.
    pub fn visible_rows(&self) -> u64 {
        self.visible_rows
    }

    /// Resolves a column name through the transaction's cache.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.tx.column_index(name)
    }

    /// Reads a typed value.
    ///
    /// # Errors
    ///
    /// - [`JournalError::InvalidState`] if `row_id` belongs to another partition
    /// - [`JournalError::RowOutOfRange`] if the local row is not visible
    /// - [`JournalError::ColumnIndexOutOfRange`] for an unknown column index
    /// - [`JournalError::TypeMismatch`] if the column is not stored as `T`
    pub fn get<T: ColumnValue>(&self, row_id: u64, column: usize) -> Result<T> {
        let addressing = self.tx.addressing();
        let partition = addressing.to_partition_index(row_id);
        if partition != self.index {
            return Err(JournalError::InvalidState(format!(
                "row {} is in partition {}, binding is for {}",
                row_id, partition, self.index
            )));
        }

        let local_row = addressing.to_local_row_id(row_id);
        if local_row >= self.visible_rows {
            return Err(JournalError::RowOutOfRange {
                row_id,
                partition,
                local_row,
                visible_rows: self.visible_rows,
            });
        }

        let data = self.column_data(column)?;
        let row = local_row as usize;
        if row >= data.len() {
            return Err(JournalError::InvalidState(format!(
                "partition {} column {} holds {} rows, {} visible",
                self.partition.name(),
                column,
                data.len(),
                self.visible_rows
            )));
        }
        data.read::<T>(row).ok_or_else(|| JournalError::TypeMismatch {
            column: self
                .tx
                .metadata()
                .column(column)
                .map_or_else(|| format!("#{}", column), |meta| meta.name.clone()),
            requested: T::TYPE_NAME,
            stored: data.column_type(),
        })
    }

    /// Column handle for `column`, opened on first use.
    pub fn column_data(&self, column: usize) -> Result<Arc<ColumnChunks>> {
        let mut columns = self.columns.borrow_mut();
        let count = columns.len();
        let slot = columns
            .get_mut(column)
            .ok_or(JournalError::ColumnIndexOutOfRange {
                index: column,
                count,
            })?;
        match slot {
            Some(data) => Ok(Arc::clone(data)),
            None => {
                let data = self.partition.read_column(column)?;
                *slot = Some(Arc::clone(&data));
                Ok(data)
            }
        }
    }
}

impl Drop for PartitionBinding<'_> {
    fn drop(&mut self) {
        // The head partition is still being appended to and stays open.
        if self.index + 1 >= self.tx.partition_count() {
            return;
        }
        let ttl_ms = self.tx.config().offload_ttl_ms;
        if let Err(err) = self
            .tx
            .scheduler()
            .signal_partition_idle(Arc::clone(&self.partition), ttl_ms)
        {
            debug!(partition = %self.partition.name(), "idle signal dropped: {}", err);
        }
    }
}
