//! Column types, records and journal metadata.

use crate::error::{JournalError, Result};
use crate::lifecycle::partition_by::Timestamp;
use std::collections::HashMap;
use std::fmt;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean flag.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Double,
    /// Nanosecond timestamp.
    Timestamp,
    /// UTF-8 string.
    String,
}

impl ColumnType {
    /// Lower-case type name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Timestamp => "timestamp",
            Self::String => "string",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer value.
    Int32(i32),
    /// 64-bit integer value.
    Int64(i64),
    /// Float value.
    Double(f64),
    /// Nanosecond timestamp value.
    Timestamp(Timestamp),
    /// String value.
    String(String),
}

impl Value {
    /// Column type this value can be stored in.
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
}

/// One row to append, with a value per schema column in schema order.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::journal::schema::{Record, Value};
///
/// let quote = Record::new(vec![
///     Value::String("EURUSD".into()),
///     Value::Double(1.3045),
///     Value::Double(1.3047),
///     Value::Timestamp(1_363_348_800_000_000_000),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    /// Creates a record from values in schema order.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Values in schema order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at a column index.
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the record has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name, unique within the journal.
    pub name: String,
    /// Storage type.
    pub column_type: ColumnType,
}

impl ColumnMeta {
    /// Creates column metadata.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Extracts the designated timestamp from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampReader {
    column: usize,
}

impl TimestampReader {
    /// Reader for the timestamp stored at `column`.
    pub fn new(column: usize) -> Self {
        Self { column }
    }

    /// Column index the timestamp is read from.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Reads the record's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::TypeMismatch`] if the value is missing or not a timestamp.
    pub fn read(&self, record: &Record) -> Result<Timestamp> {
        match record.get(self.column) {
            Some(Value::Timestamp(ts)) => Ok(*ts),
            Some(other) => Err(JournalError::TypeMismatch {
                column: format!("#{}", self.column),
                requested: "timestamp",
                stored: other.column_type(),
            }),
            None => Err(JournalError::RecordArity {
                expected: self.column + 1,
                actual: record.len(),
            }),
        }
    }
}

/// Journal-wide column metadata consumed by readers and the writer.
pub trait JournalMetadata: Send + Sync {
    /// All columns in storage order.
    fn columns(&self) -> &[ColumnMeta];

    /// Looks up a column index by name.
    fn column_id(&self, name: &str) -> Option<usize>;

    /// Index of the designated timestamp column.
    fn timestamp_column(&self) -> usize;

    /// Accessor for the designated timestamp of a record.
    fn timestamp_reader(&self) -> TimestampReader {
        TimestampReader::new(self.timestamp_column())
    }

    /// Metadata for the column at `index`.
    fn column(&self, index: usize) -> Option<&ColumnMeta> {
        self.columns().get(index)
    }
}

/// Default [`JournalMetadata`] built from a column list.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnMeta>,
    by_name: HashMap<String, usize>,
    timestamp_column: usize,
}

impl Schema {
    /// Builds a schema with `timestamp` as the designated timestamp column.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] for duplicate column names or a
    /// timestamp column that is missing or not of type `Timestamp`.
    pub fn new(columns: Vec<ColumnMeta>, timestamp: &str) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            if by_name.insert(column.name.clone(), index).is_some() {
                return Err(JournalError::InvalidConfig(format!(
                    "duplicate column name {}",
                    column.name
                )));
            }
        }

        let timestamp_column = *by_name
            .get(timestamp)
            .ok_or_else(|| JournalError::InvalidConfig(format!("no timestamp column {}", timestamp)))?;
        if columns[timestamp_column].column_type != ColumnType::Timestamp {
            return Err(JournalError::InvalidConfig(format!(
                "column {} is {}, not timestamp",
                timestamp, columns[timestamp_column].column_type
            )));
        }

        Ok(Self {
            columns,
            by_name,
            timestamp_column,
        })
    }
}

impl JournalMetadata for Schema {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn column_id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    fn timestamp_column(&self) -> usize {
        self.timestamp_column
    }
}
