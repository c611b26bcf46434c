//! Integration tests for idle partition offload.

use alopex_journal::journal::{ColumnMeta, ColumnType, Record, Schema, Value};
use alopex_journal::lifecycle::ManualClock;
use alopex_journal::{DeferredTaskScheduler, Journal, JournalConfig, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 2013-03-15T00:00:00Z
const DAY_START: Timestamp = 1_363_305_600_000_000_000;
const DAY: Timestamp = 86_400 * 1_000_000_000;

fn trade_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(
            vec![
                ColumnMeta::new("sym", ColumnType::String),
                ColumnMeta::new("price", ColumnType::Double),
                ColumnMeta::new("size", ColumnType::Int64),
                ColumnMeta::new("timestamp", ColumnType::Timestamp),
            ],
            "timestamp",
        )
        .unwrap(),
    )
}

fn trade(price: f64, ts: Timestamp) -> Record {
    Record::new(vec![
        Value::String("AAPL".into()),
        Value::Double(price),
        Value::Int64(100),
        Value::Timestamp(ts),
    ])
}

fn manual_journal(ttl_ms: i64) -> (Journal, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = JournalConfig::default().with_offload_ttl_ms(ttl_ms);
    let scheduler = DeferredTaskScheduler::manual(config.scheduler_latency, clock.clone());
    let journal = Journal::with_scheduler(config, trade_schema(), scheduler).unwrap();
    (journal, clock)
}

/// Commits one trade per day for `days` days.
fn write_days(journal: &Journal, days: i64) {
    let mut writer = journal.writer().unwrap();
    for day in 0..days {
        writer.append(&trade(100.0 + day as f64, DAY_START + day * DAY)).unwrap();
    }
    writer.commit().unwrap();
}

fn read_first_price(journal: &Journal, partition: usize) -> f64 {
    let tx = journal.read_tx();
    let row_id = journal.addressing().to_global_row_id(partition, 0).unwrap();
    let mut records = tx.record_set(vec![row_id]);
    records.get(row_id, 1).unwrap()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_idle_partition_offloaded_after_ttl() {
    let (journal, clock) = manual_journal(1_000);
    write_days(&journal, 2);
    let scheduler = journal.scheduler();
    // The commit signals the non-head partition it touched.
    assert_eq!(scheduler.pending(), 1);
    scheduler.run_pending_now().unwrap();
    assert_eq!(scheduler.pending(), 1);

    clock.advance(1_000);
    assert_eq!(scheduler.run_pending_now().unwrap(), 1);

    assert_eq!(read_first_price(&journal, 0), 100.0);
    let first = Arc::clone(&journal.partitions()[0]);
    assert_eq!(first.open_handles(), 1);
    // Releasing the binding signals the partition idle again.
    assert_eq!(scheduler.pending(), 1);

    clock.advance(999);
    assert_eq!(scheduler.run_pending_now().unwrap(), 0);
    assert_eq!(first.open_handles(), 1);

    clock.advance(1);
    assert_eq!(scheduler.run_pending_now().unwrap(), 1);
    assert_eq!(first.open_handles(), 0);

    // Handles reopen on the next read.
    assert_eq!(read_first_price(&journal, 0), 100.0);
    assert_eq!(first.open_handles(), 1);
}

#[test]
fn test_alternating_reads_queue_one_offload_per_partition() {
    let (journal, clock) = manual_journal(1_000);
    write_days(&journal, 3);
    let scheduler = journal.scheduler();
    assert_eq!(scheduler.pending(), 2);

    let tx = journal.read_tx();
    let addressing = journal.addressing();
    let first = addressing.to_global_row_id(0, 0).unwrap();
    let second = addressing.to_global_row_id(1, 0).unwrap();
    let mut records = tx.record_set(vec![first, second]);
    for _ in 0..10_000 {
        records.get::<f64>(first, 1).unwrap();
        records.get::<f64>(second, 1).unwrap();
    }
    drop(records);
    assert_eq!(scheduler.pending(), 2);

    // The last signal, not the first, starts the countdown.
    clock.advance(600);
    read_first_price(&journal, 0);
    clock.advance(400);
    assert_eq!(scheduler.run_pending_now().unwrap(), 2);
    let partitions = journal.partitions();
    assert_eq!(partitions[0].open_handles(), 1);
    assert_eq!(partitions[1].open_handles(), 0);
    assert_eq!(scheduler.pending(), 1);

    clock.advance(600);
    assert_eq!(scheduler.run_pending_now().unwrap(), 1);
    assert_eq!(partitions[0].open_handles(), 0);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn test_head_partition_not_signaled() {
    let (journal, _clock) = manual_journal(0);
    write_days(&journal, 1);
    assert_eq!(journal.scheduler().pending(), 0);

    read_first_price(&journal, 0);
    assert_eq!(journal.scheduler().pending(), 0);
    assert_eq!(journal.partitions()[0].open_handles(), 1);
}

#[test]
fn test_offload_skipped_while_reader_bound() {
    let (journal, _clock) = manual_journal(0);
    write_days(&journal, 2);
    let scheduler = journal.scheduler();
    scheduler.run_pending_now().unwrap();

    let tx = journal.read_tx();
    let binding = tx.bind_partition(0).unwrap();
    binding.column_data(1).unwrap();
    let first = Arc::clone(binding.partition());

    scheduler
        .signal_partition_idle(Arc::clone(&first), 0)
        .unwrap();
    assert_eq!(scheduler.run_pending_now().unwrap(), 1);
    assert_eq!(first.open_handles(), 1);
    assert_eq!(first.lock().read_refs(), 1);

    drop(binding);
    assert_eq!(first.lock().read_refs(), 0);
    assert_eq!(scheduler.run_pending_now().unwrap(), 1);
    assert_eq!(first.open_handles(), 0);
}

#[test]
fn test_reader_waits_for_offload_in_progress() {
    let (journal, _clock) = manual_journal(-1);
    write_days(&journal, 2);
    let first = Arc::clone(&journal.partitions()[0]);

    let exclusive = first.lock().write();
    let bound = Arc::new(AtomicBool::new(false));
    let reader = {
        let journal = journal.clone();
        let bound = Arc::clone(&bound);
        thread::spawn(move || {
            let price = read_first_price(&journal, 0);
            bound.store(true, Ordering::SeqCst);
            price
        })
    };

    assert!(wait_for(|| first.lock().queue_length() == 1));
    assert!(!bound.load(Ordering::SeqCst));

    drop(exclusive);
    assert_eq!(reader.join().unwrap(), 100.0);
    assert!(bound.load(Ordering::SeqCst));
    assert_eq!(first.lock().read_refs(), 0);
}

#[test]
fn test_negative_ttl_disables_offload() {
    let (journal, _clock) = manual_journal(-1);
    write_days(&journal, 3);
    read_first_price(&journal, 0);
    read_first_price(&journal, 1);
    assert_eq!(journal.scheduler().pending(), 0);
}

#[test]
fn test_timer_driven_offload() {
    let config = JournalConfig::default()
        .with_offload_ttl_ms(20)
        .with_scheduler_latency(Duration::from_millis(5));
    let journal = Journal::open(config, trade_schema()).unwrap();
    write_days(&journal, 2);

    read_first_price(&journal, 0);
    let first = Arc::clone(&journal.partitions()[0]);
    assert!(wait_for(|| first.open_handles() == 0));
    assert!(wait_for(|| journal.scheduler().pending() == 0));
    journal.close();
}

#[test]
fn test_reads_survive_journal_close() {
    let (journal, _clock) = manual_journal(0);
    write_days(&journal, 2);
    journal.close();
    assert!(journal.scheduler().is_disposed());

    // Idle signals are dropped quietly once the scheduler is gone.
    assert_eq!(read_first_price(&journal, 0), 100.0);
    assert_eq!(read_first_price(&journal, 1), 101.0);
}
