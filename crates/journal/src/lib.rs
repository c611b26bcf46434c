//! Alopex Journal - append-only partitioned columnar time series journal
//!
//! This crate provides single-writer / multi-reader access to a journal of
//! typed records with snapshot isolation.
//!
//! # Components
//!
//! - [`SharedExclusiveLock`]: Reader/writer lock with an explicit FIFO wait queue
//! - [`DeferredTaskScheduler`]: Coalesced timer for partition offload and timeouts
//! - [`RowAddressing`]: Global row id encoding
//! - [`ReadTx`] / [`RecordSet`]: Snapshot-isolated typed reads
//! - [`Writer`]: Append/commit path behind a single write permit
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_journal::journal::{ColumnMeta, ColumnType, Record, Schema, Value};
//! use alopex_journal::{Journal, JournalConfig};
//! use std::sync::Arc;
//!
//! let schema = Schema::new(
//!     vec![
//!         ColumnMeta::new("sym", ColumnType::String),
//!         ColumnMeta::new("bid", ColumnType::Double),
//!         ColumnMeta::new("timestamp", ColumnType::Timestamp),
//!     ],
//!     "timestamp",
//! )?;
//! let journal = Journal::open(JournalConfig::default(), Arc::new(schema))?;
//!
//! let mut writer = journal.writer()?;
//! writer.append(&Record::new(vec![
//!     Value::String("EURUSD".into()),
//!     Value::Double(1.3045),
//!     Value::Timestamp(1_363_348_800_000_000_000),
//! ]))?;
//! writer.commit()?;
//!
//! let tx = journal.read_tx();
//! let bid = tx.column_index("bid")?;
//! let mut records = tx.record_set(tx.row_ids());
//! for row_id in tx.row_ids() {
//!     let price: f64 = records.get(row_id, bid)?;
//! }
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod journal;
pub mod lifecycle;
pub mod sync;

pub use config::JournalConfig;
pub use error::{JournalError, Result};
pub use journal::{
    Journal, JournalMetadata, ReadTx, RecordCursor, RecordSet, RowAddressing, Schema, Writer,
};
pub use lifecycle::{DeferredTaskScheduler, PartitionBy, TimeRange, Timestamp};
pub use sync::SharedExclusiveLock;
