//! Typed reads over a sequence of row ids.

use crate::error::{JournalError, Result};
use crate::journal::binding::PartitionBinding;
use crate::journal::column::ColumnValue;
use crate::journal::snapshot::ReadTx;
use std::fmt;

/// Reads typed values for arbitrary row ids of one transaction.
///
/// The binding of the last partition touched is kept in a single slot. A
/// read that lands in the same partition reuses it; a read in any other
/// partition drops it first and binds the new partition. Scans in row-id
/// order therefore bind each partition once.
pub struct RecordSet<'tx, I> {
    tx: &'tx ReadTx,
    ids: I,
    cached: Option<PartitionBinding<'tx>>,
}

impl<I> fmt::Debug for RecordSet<'_, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSet")
            .field("tx", self.tx)
            .field("cached_partition", &self.cached.as_ref().map(PartitionBinding::index))
            .finish()
    }
}

impl<'tx, I> RecordSet<'tx, I>
where
    I: IntoIterator<Item = u64> + Clone,
{
    pub(crate) fn new(tx: &'tx ReadTx, ids: I) -> Self {
        Self {
            tx,
            ids,
            cached: None,
        }
    }

    /// Reads column `column` of `row_id` as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::PartitionOutOfRange`],
    /// [`JournalError::RowOutOfRange`] or [`JournalError::TypeMismatch`].
    pub fn get<T: ColumnValue>(&mut self, row_id: u64, column: usize) -> Result<T> {
        self.binding_for(row_id)?.get(row_id, column)
    }

    /// Reads a column by name.
    pub fn get_by_name<T: ColumnValue>(&mut self, row_id: u64, name: &str) -> Result<T> {
        let column = self.tx.column_index(name)?;
        self.get(row_id, column)
    }

    /// The row ids driving this record set.
    ///
    /// Each call starts a fresh pass over the caller-supplied sequence.
    pub fn record_ids(&self) -> I::IntoIter {
        self.ids.clone().into_iter()
    }

    /// Resolves a column name through the transaction's cache.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.tx.column_index(name)
    }

    /// Index of the partition currently held in the binding slot.
    pub fn cached_partition(&self) -> Option<usize> {
        self.cached.as_ref().map(PartitionBinding::index)
    }

    /// Cursor walking the row ids in order.
    pub fn cursor(&mut self) -> RecordCursor<'_, 'tx, I> {
        let ids = self.record_ids();
        RecordCursor {
            set: self,
            ids,
            current: None,
        }
    }

    fn binding_for(&mut self, row_id: u64) -> Result<&PartitionBinding<'tx>> {
        let partition = self.tx.addressing().to_partition_index(row_id);
        let binding = match self.cached.take() {
            Some(binding) if binding.index() == partition => binding,
            stale => {
                // Release the old partition before holding the next one.
                drop(stale);
                self.tx.bind_partition(partition)?
            }
        };
        Ok(self.cached.insert(binding))
    }
}

/// Forward cursor over a [`RecordSet`].
///
/// # Examples
/// ```rust,ignore
/// let mut records = tx.record_set(tx.row_ids());
/// let mut cursor = records.cursor();
/// while cursor.next_row().is_some() {
///     let sym: String = cursor.get(0)?;
/// }
/// ```
pub struct RecordCursor<'a, 'tx, I>
where
    I: IntoIterator<Item = u64> + Clone,
{
    set: &'a mut RecordSet<'tx, I>,
    ids: I::IntoIter,
    current: Option<u64>,
}

impl<'a, 'tx, I> RecordCursor<'a, 'tx, I>
where
    I: IntoIterator<Item = u64> + Clone,
{
    /// Advances to the next row id.
    pub fn next_row(&mut self) -> Option<u64> {
        self.current = self.ids.next();
        self.current
    }

    /// Row id under the cursor.
    pub fn row_id(&self) -> Option<u64> {
        self.current
    }

    /// Reads a column of the current row.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] before the
    /// first [`next_row`](Self::next_row) or after the end.
    pub fn get<T: ColumnValue>(&mut self, column: usize) -> Result<T> {
        let row_id = self
            .current
            .ok_or_else(|| JournalError::InvalidState("cursor is not on a row".to_string()))?;
        self.set.get(row_id, column)
    }
}
