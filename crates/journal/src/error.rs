//! Error and Result types for journal operations.

use crate::journal::schema::ColumnType;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// The error type for journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// A lock or resource was released in a mode it was not held in.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The resource was disposed and can no longer be used.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// Column name is unknown to both the transaction cache and the journal metadata.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Column index is outside the journal's column list.
    #[error("Column index {index} out of range ({count} columns)")]
    ColumnIndexOutOfRange {
        /// Requested column index.
        index: usize,
        /// Number of columns in the schema.
        count: usize,
    },

    /// Row id addresses a local row beyond what the snapshot can see.
    #[error("Row {row_id} out of range: local row {local_row} >= visible rows {visible_rows} in partition {partition}")]
    RowOutOfRange {
        /// Global row id requested.
        row_id: u64,
        /// Partition index decoded from the row id.
        partition: usize,
        /// Local row offset decoded from the row id.
        local_row: u64,
        /// Committed rows visible to the snapshot.
        visible_rows: u64,
    },

    /// Row id addresses a partition the snapshot does not contain.
    #[error("Partition {partition} out of range: snapshot has {visible} partitions")]
    PartitionOutOfRange {
        /// Partition index decoded from the row id.
        partition: usize,
        /// Partitions visible to the snapshot.
        visible: usize,
    },

    /// Requested value type does not match the stored column type.
    #[error("Type mismatch on column {column}: requested {requested}, stored {stored}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Type requested by the caller.
        requested: &'static str,
        /// Type stored in the column.
        stored: ColumnType,
    },

    /// Appended timestamp is earlier than data already in the journal.
    #[error("Out of order timestamp {timestamp}: journal already holds {last}")]
    OutOfOrderTimestamp {
        /// Timestamp of the rejected record.
        timestamp: i64,
        /// Latest timestamp appended so far.
        last: i64,
    },

    /// Local row id does not fit in the configured bit-hint.
    #[error("Local row id {local_row} does not fit in {bit_hint} bits")]
    LocalRowIdOutOfRange {
        /// Rejected local row id.
        local_row: u64,
        /// Configured bit-hint.
        bit_hint: u32,
    },

    /// Partition index does not fit above the configured bit-hint.
    #[error("Partition index {partition} does not fit above {bit_hint} bits")]
    PartitionIndexOutOfRange {
        /// Rejected partition index.
        partition: usize,
        /// Configured bit-hint.
        bit_hint: u32,
    },

    /// Another writer currently holds the journal's write permit.
    #[error("Journal already has an active writer")]
    WriterBusy,

    /// Configuration value rejected at open time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record does not carry one value per schema column.
    #[error("Record arity mismatch: expected {expected} values, got {actual}")]
    RecordArity {
        /// Columns in the schema.
        expected: usize,
        /// Values in the record.
        actual: usize,
    },

    /// Underlying I/O error, such as a failed timer thread spawn.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A scheduled or offload action reported failure.
    #[error("Action {name} failed: {reason}")]
    ActionFailed {
        /// Name of the scheduled task.
        name: String,
        /// Failure description.
        reason: String,
    },
}
