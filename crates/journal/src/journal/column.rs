//! Typed column storage and typed value reads.
//!
//! Writers buffer rows in a [`ColumnData`] per column. On commit the buffer
//! is copied into the partition's [`ColumnChunks`], which readers share
//! through cheap handles.

use crate::error::{JournalError, Result};
use crate::journal::schema::{ColumnType, Value};
use crate::lifecycle::partition_by::Timestamp;
use std::ops::Range;
use std::sync::Arc;

/// Contiguous values of one column: a pending write buffer or one committed
/// chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Boolean column.
    Bool(Vec<bool>),
    /// 32-bit integer column.
    Int32(Vec<i32>),
    /// 64-bit integer column.
    Int64(Vec<i64>),
    /// Float column.
    Double(Vec<f64>),
    /// Timestamp column.
    Timestamp(Vec<Timestamp>),
    /// String column.
    String(Vec<String>),
}

impl ColumnData {
    /// Creates an empty column of the given type.
    pub fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Bool => Self::Bool(Vec::new()),
            ColumnType::Int32 => Self::Int32(Vec::new()),
            ColumnType::Int64 => Self::Int64(Vec::new()),
            ColumnType::Double => Self::Double(Vec::new()),
            ColumnType::Timestamp => Self::Timestamp(Vec::new()),
            ColumnType::String => Self::String(Vec::new()),
        }
    }

    /// Storage type of the column.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::Int32(_) => ColumnType::Int32,
            Self::Int64(_) => ColumnType::Int64,
            Self::Double(_) => ColumnType::Double,
            Self::Timestamp(_) => ColumnType::Timestamp,
            Self::String(_) => ColumnType::String,
        }
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Timestamp(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    /// Returns true if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `value` can be pushed onto this column.
    pub fn accepts(&self, value: &Value) -> bool {
        value.column_type() == self.column_type()
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::TypeMismatch`] if the value type differs from
    /// the column type; the column is left unchanged.
    pub fn push(&mut self, column: &str, value: &Value) -> Result<()> {
        match (self, value) {
            (Self::Bool(v), Value::Bool(x)) => v.push(*x),
            (Self::Int32(v), Value::Int32(x)) => v.push(*x),
            (Self::Int64(v), Value::Int64(x)) => v.push(*x),
            (Self::Double(v), Value::Double(x)) => v.push(*x),
            (Self::Timestamp(v), Value::Timestamp(x)) => v.push(*x),
            (Self::String(v), Value::String(x)) => v.push(x.clone()),
            (this, other) => {
                return Err(JournalError::TypeMismatch {
                    column: column.to_string(),
                    requested: other.column_type().name(),
                    stored: this.column_type(),
                })
            }
        }
        Ok(())
    }

    /// Copies `other[range]` onto the end of this column.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] if the column types differ.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds for `other`.
    pub fn extend_from(&mut self, other: &ColumnData, range: Range<usize>) -> Result<()> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(&b[range]),
            (Self::Int32(a), Self::Int32(b)) => a.extend_from_slice(&b[range]),
            (Self::Int64(a), Self::Int64(b)) => a.extend_from_slice(&b[range]),
            (Self::Double(a), Self::Double(b)) => a.extend_from_slice(&b[range]),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.extend_from_slice(&b[range]),
            (Self::String(a), Self::String(b)) => a.extend_from_slice(&b[range]),
            (this, other) => {
                return Err(JournalError::InvalidState(format!(
                    "cannot append {} column onto {} column",
                    other.column_type(),
                    this.column_type()
                )))
            }
        }
        Ok(())
    }

    /// Removes every value, keeping the column type.
    pub fn clear(&mut self) {
        *self = Self::new(self.column_type());
    }

    /// Value at `row` as a dynamically typed [`Value`].
    pub fn value(&self, row: usize) -> Option<Value> {
        Some(match self {
            Self::Bool(v) => Value::Bool(*v.get(row)?),
            Self::Int32(v) => Value::Int32(*v.get(row)?),
            Self::Int64(v) => Value::Int64(*v.get(row)?),
            Self::Double(v) => Value::Double(*v.get(row)?),
            Self::Timestamp(v) => Value::Timestamp(*v.get(row)?),
            Self::String(v) => Value::String(v.get(row)?.clone()),
        })
    }
}

/// Rows per chunk of a committed column.
pub const CHUNK_ROWS: usize = 4_096;

/// Committed values of one column, split into fixed-size chunks.
///
/// Every chunk but the last holds exactly [`CHUNK_ROWS`] values and is never
/// modified again. Appending copies at most the partially filled tail chunk
/// and the chunk list when an older handle still shares them; sealed chunks
/// are shared between handles.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChunks {
    column_type: ColumnType,
    chunks: Vec<Arc<ColumnData>>,
    len: usize,
}

impl ColumnChunks {
    /// Creates an empty column of the given type.
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            chunks: Vec::new(),
            len: 0,
        }
    }

    /// Storage type of the column.
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The chunks in row order.
    pub fn chunks(&self) -> &[Arc<ColumnData>] {
        &self.chunks
    }

    /// Appends every value of `pending` and leaves it empty.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] if the column types differ; the
    /// column is left unchanged.
    pub fn append(&mut self, pending: &mut ColumnData) -> Result<()> {
        if pending.column_type() != self.column_type {
            return Err(JournalError::InvalidState(format!(
                "cannot append {} column onto {} column",
                pending.column_type(),
                self.column_type
            )));
        }

        let total = pending.len();
        let mut offset = 0;
        while offset < total {
            let tail_full = self
                .chunks
                .last()
                .map_or(true, |chunk| chunk.len() >= CHUNK_ROWS);
            if tail_full {
                self.chunks.push(Arc::new(ColumnData::new(self.column_type)));
            }
            let Some(tail) = self.chunks.last_mut() else {
                break;
            };
            let tail = Arc::make_mut(tail);
            let take = (CHUNK_ROWS - tail.len()).min(total - offset);
            tail.extend_from(pending, offset..offset + take)?;
            offset += take;
            self.len += take;
        }
        pending.clear();
        Ok(())
    }

    /// Reads the value at `row` as `T`.
    ///
    /// Returns `None` if `row` is out of bounds or the column is not stored
    /// as `T`.
    pub fn read<T: ColumnValue>(&self, row: usize) -> Option<T> {
        let (chunk, offset) = self.locate(row)?;
        T::read(chunk, offset)
    }

    /// Index of the first of the first `rows` timestamps for which `pred`
    /// is false, assuming `pred` is true for a prefix of them.
    ///
    /// Returns `None` if this is not a timestamp column.
    pub fn timestamp_partition_point<P>(&self, rows: usize, mut pred: P) -> Option<usize>
    where
        P: FnMut(Timestamp) -> bool,
    {
        if self.column_type != ColumnType::Timestamp {
            return None;
        }
        let (mut lo, mut hi) = (0, rows.min(self.len));
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.read::<i64>(mid)?) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Some(lo)
    }

    fn locate(&self, row: usize) -> Option<(&ColumnData, usize)> {
        if row >= self.len {
            return None;
        }
        let chunk = self.chunks.get(row / CHUNK_ROWS)?;
        Some((chunk, row % CHUNK_ROWS))
    }
}

/// Rust type that can be read out of a column.
pub trait ColumnValue: Sized {
    /// Name used in type mismatch errors.
    const TYPE_NAME: &'static str;

    /// Reads the value at `row`.
    ///
    /// Returns `None` when the column's storage type does not match `Self`.
    /// `row` must be in bounds.
    fn read(column: &ColumnData, row: usize) -> Option<Self>;
}

impl ColumnValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn read(column: &ColumnData, row: usize) -> Option<Self> {
        match column {
            ColumnData::Bool(v) => v.get(row).copied(),
            _ => None,
        }
    }
}

impl ColumnValue for i32 {
    const TYPE_NAME: &'static str = "int32";

    fn read(column: &ColumnData, row: usize) -> Option<Self> {
        match column {
            ColumnData::Int32(v) => v.get(row).copied(),
            _ => None,
        }
    }
}

/// Reads both `Int64` and `Timestamp` columns.
impl ColumnValue for i64 {
    const TYPE_NAME: &'static str = "int64";

    fn read(column: &ColumnData, row: usize) -> Option<Self> {
        match column {
            ColumnData::Int64(v) | ColumnData::Timestamp(v) => v.get(row).copied(),
            _ => None,
        }
    }
}

impl ColumnValue for f64 {
    const TYPE_NAME: &'static str = "double";

    fn read(column: &ColumnData, row: usize) -> Option<Self> {
        match column {
            ColumnData::Double(v) => v.get(row).copied(),
            _ => None,
        }
    }
}

impl ColumnValue for String {
    const TYPE_NAME: &'static str = "string";

    fn read(column: &ColumnData, row: usize) -> Option<Self> {
        match column {
            ColumnData::String(v) => v.get(row).cloned(),
            _ => None,
        }
    }
}

/// Reads any column type.
impl ColumnValue for Value {
    const TYPE_NAME: &'static str = "value";

    fn read(column: &ColumnData, row: usize) -> Option<Self> {
        column.value(row)
    }
}
