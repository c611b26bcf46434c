//! Coalesced deferred task scheduler.
//!
//! Maintenance work (closing idle partitions, generic timeouts) is deferred
//! onto a single background timer instead of one timer per event.
//!
//! # Architecture
//!
//! ```text
//! schedule() ──▶ incoming (SegQueue) ──tick──▶ working heap ──▶ run due tasks
//!      │                                                            │
//!      └── in-flight 0 → 1 arms timer          in-flight > 0 re-arms ┘
//! ```
//!
//! Producers never block: they push onto a lock-free queue and bump the
//! in-flight counter. The timer is single-shot and only re-armed after a tick
//! completes, so ticks never overlap. While work remains the timer re-arms
//! with the fixed poll latency rather than the next exact due time, trading
//! precision for a single recurring timer.

use crate::error::{JournalError, Result};
use crate::journal::storage::PartitionStorage;
use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Deferred work item. Failures are logged, never propagated.
pub type TaskAction = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Millisecond clock used to compute due times.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds from an arbitrary origin.
    fn now_ms(&self) -> i64;
}

/// Monotonic clock measured from its creation.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

struct ScheduledTask {
    due_ms: i64,
    seq: u64,
    name: String,
    action: TaskAction,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due_ms
            .cmp(&other.due_ms)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Per-partition state that folds repeated idle signals into one pending
/// offload.
///
/// The offload runs once the TTL has passed since the most recent signal. A
/// task that finds a newer signal re-schedules itself for the remainder.
#[derive(Debug, Default)]
pub struct IdleState {
    scheduled: AtomicBool,
    last_signal_ms: AtomicI64,
}

impl IdleState {
    /// Creates state with no offload pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while an offload task is queued for the partition.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Clock time of the most recent idle signal.
    pub fn last_signal_ms(&self) -> i64 {
        self.last_signal_ms.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct SchedulerShared {
    incoming: SegQueue<ScheduledTask>,
    in_flight: AtomicUsize,
    working: Mutex<BinaryHeap<Reverse<ScheduledTask>>>,
    timer: Mutex<TimerState>,
    timer_cond: Condvar,
    soft_stopped: AtomicBool,
    disposed: AtomicBool,
    next_seq: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    latency: Duration,
    clock: Arc<dyn Clock>,
}

impl SchedulerShared {
    fn arm(&self, delay: Duration) {
        let mut timer = self.timer.lock();
        if timer.shutdown {
            return;
        }
        let deadline = Instant::now() + delay;
        timer.deadline = Some(match timer.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        });
        self.timer_cond.notify_one();
    }

    fn schedule(&self, name: String, delay_ms: i64, action: TaskAction) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(JournalError::Disposed("deferred task scheduler"));
        }
        if delay_ms < 0 {
            return Ok(());
        }

        let task = ScheduledTask {
            due_ms: self.clock.now_ms().saturating_add(delay_ms),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            name,
            action,
        };

        // Count before publishing so a concurrent tick never runs a task it
        // has not been counted for.
        let previous = self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.incoming.push(task);
        if previous == 0 {
            self.arm(Duration::from_millis(delay_ms as u64));
        }
        Ok(())
    }

    fn tick(&self) -> usize {
        if self.soft_stopped.load(Ordering::Acquire) {
            return 0;
        }

        let now = self.clock.now_ms();
        let mut due = Vec::new();
        {
            let mut working = self.working.lock();
            while let Some(task) = self.incoming.pop() {
                working.push(Reverse(task));
            }
            while working
                .peek()
                .map_or(false, |Reverse(head)| head.due_ms <= now)
            {
                if let Some(Reverse(task)) = working.pop() {
                    due.push(task);
                }
            }
        }

        // Actions run unlocked and may schedule or tick themselves.
        let executed = due.len();
        for task in due {
            self.run(task);
        }

        let remaining = if executed > 0 {
            self.in_flight.fetch_sub(executed, Ordering::AcqRel) - executed
        } else {
            self.in_flight.load(Ordering::Acquire)
        };
        if remaining > 0 {
            self.arm(self.latency);
        }
        executed
    }

    fn run(&self, task: ScheduledTask) {
        let ScheduledTask { name, action, .. } = task;
        match panic::catch_unwind(AssertUnwindSafe(action)) {
            Ok(Ok(())) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(task = %name, "scheduled action failed: {}", err);
            }
            Err(payload) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(task = %name, "scheduled action panicked: {}", panic_message(&*payload));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn offload_action(
    shared: Weak<SchedulerShared>,
    partition: Arc<dyn PartitionStorage>,
    ttl_ms: i64,
) -> TaskAction {
    Box::new(move || {
        let state = partition.idle_state();
        if let Some(scheduler) = shared.upgrade() {
            let due = state.last_signal_ms().saturating_add(ttl_ms);
            let now = scheduler.clock.now_ms();
            if now < due {
                let name = format!("offload {}", partition.name());
                let next = offload_action(Weak::clone(&shared), Arc::clone(&partition), ttl_ms);
                return scheduler.schedule(name, due - now, next);
            }
        }
        state.scheduled.store(false, Ordering::Release);
        partition.try_close_files();
        Ok(())
    })
}

fn timer_loop(shared: Arc<SchedulerShared>) {
    let mut timer = shared.timer.lock();
    loop {
        if timer.shutdown {
            break;
        }
        match timer.deadline {
            None => shared.timer_cond.wait(&mut timer),
            Some(deadline) if Instant::now() < deadline => {
                shared.timer_cond.wait_until(&mut timer, deadline);
            }
            Some(_) => {
                timer.deadline = None;
                MutexGuard::unlocked(&mut timer, || {
                    shared.tick();
                });
            }
        }
    }
    debug!("deferred task timer stopped");
}

/// Single-timer scheduler for named, delayed actions.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::lifecycle::scheduler::DeferredTaskScheduler;
/// use std::time::Duration;
///
/// let scheduler = DeferredTaskScheduler::new(Duration::from_millis(100))?;
/// scheduler.schedule("flush stats", 500, || Ok(()))?;
/// ```
pub struct DeferredTaskScheduler {
    shared: Arc<SchedulerShared>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for DeferredTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTaskScheduler")
            .field("pending", &self.pending())
            .field("latency", &self.shared.latency)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl DeferredTaskScheduler {
    /// Creates a scheduler driven by a background timer thread and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer thread cannot be spawned.
    pub fn new(latency: Duration) -> Result<Self> {
        Self::with_clock(latency, Arc::new(SystemClock::default()))
    }

    /// Creates a timer-driven scheduler that computes due times from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer thread cannot be spawned.
    pub fn with_clock(latency: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let shared = Arc::new(Self::shared(latency, clock));
        let timer_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("journal-deferred-tasks".into())
            .spawn(move || timer_loop(timer_shared))?;
        Ok(Self {
            shared,
            timer_thread: Mutex::new(Some(handle)),
        })
    }

    /// Creates a scheduler with no timer thread.
    ///
    /// Work only runs through [`run_pending_now`](Self::run_pending_now),
    /// which makes tests deterministic.
    pub fn manual(latency: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Self::shared(latency, clock)),
            timer_thread: Mutex::new(None),
        }
    }

    fn shared(latency: Duration, clock: Arc<dyn Clock>) -> SchedulerShared {
        SchedulerShared {
            incoming: SegQueue::new(),
            in_flight: AtomicUsize::new(0),
            working: Mutex::new(BinaryHeap::new()),
            timer: Mutex::new(TimerState::default()),
            timer_cond: Condvar::new(),
            soft_stopped: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency,
            clock,
        }
    }

    /// Schedules `action` to run once `delay_ms` has elapsed.
    ///
    /// A negative delay means "never run" and the call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Disposed`] after [`dispose`](Self::dispose).
    pub fn schedule<F>(&self, name: impl Into<String>, delay_ms: i64, action: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.shared.schedule(name.into(), delay_ms, Box::new(action))
    }

    /// Schedules the partition's files to be closed after `ttl_ms` of quiet.
    ///
    /// Signals for a partition that already has an offload queued only move
    /// its deadline. A negative TTL disables the offload.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Disposed`] after [`dispose`](Self::dispose).
    pub fn signal_partition_idle(
        &self,
        partition: Arc<dyn PartitionStorage>,
        ttl_ms: i64,
    ) -> Result<()> {
        if self.is_disposed() {
            return Err(JournalError::Disposed("deferred task scheduler"));
        }
        if ttl_ms < 0 {
            return Ok(());
        }

        let state = partition.idle_state();
        state
            .last_signal_ms
            .fetch_max(self.shared.clock.now_ms(), Ordering::AcqRel);
        if state.scheduled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let name = format!("offload {}", partition.name());
        let action = offload_action(Arc::downgrade(&self.shared), Arc::clone(&partition), ttl_ms);
        if let Err(err) = self.shared.schedule(name, ttl_ms, action) {
            state.scheduled.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    /// Runs one tick inline on the calling thread.
    ///
    /// Returns the number of actions executed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Disposed`] after [`dispose`](Self::dispose).
    pub fn run_pending_now(&self) -> Result<usize> {
        if self.is_disposed() {
            return Err(JournalError::Disposed("deferred task scheduler"));
        }
        Ok(self.shared.tick())
    }

    /// Makes every later tick return without running anything.
    ///
    /// Pending work is dropped, not drained.
    pub fn soft_stop(&self) {
        self.shared.soft_stopped.store(true, Ordering::Release);
    }

    /// Stops the timer thread and rejects further scheduling.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut timer = self.shared.timer.lock();
            timer.shutdown = true;
            timer.deadline = None;
            self.shared.timer_cond.notify_all();
        }
        if let Some(handle) = self.timer_thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("deferred task timer thread panicked");
            }
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Number of scheduled actions not yet executed.
    pub fn pending(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Total actions executed, including failed ones.
    pub fn executed(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    /// Total actions that returned an error or panicked.
    pub fn failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Poll interval used when re-arming.
    pub fn latency(&self) -> Duration {
        self.shared.latency
    }
}

impl Drop for DeferredTaskScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}
