//! Shared/exclusive lock with an explicit wait queue.
//!
//! The lock state is a single signed counter:
//!
//! ```text
//!  0   unlocked
//!  N   N shared holders (N > 0)
//! -1   one exclusive holder
//! ```
//!
//! Uncontended acquisitions are a compare-and-swap on the counter and never
//! touch the queue. A caller that finds the lock contended may enqueue a
//! [`WaitSignal`] handle and block on it; when the lock becomes free the
//! queue is dispatched in FIFO order, granting the head on the waiter's
//! behalf and then signaling it. Consecutive queued readers drain together;
//! a granted writer stops the dispatch.
//!
//! # Fairness
//!
//! Only waiters that actually blocked are ordered. A new reader that arrives
//! while the counter is non-negative is granted immediately even if a writer
//! is queued, so a steady stream of readers can starve a queued writer.

use crate::error::{JournalError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Counter value while an exclusive holder owns the lock.
const EXCLUSIVE: i64 = -1;

/// Handle the lock signals after granting a queued acquisition.
pub trait WaitSignal: Send + Sync {
    /// Wakes the waiter.
    ///
    /// Returns `false` if the waiter has been abandoned; the lock then rolls
    /// back the grant and moves on to the next queued acquisition.
    fn signal(&self) -> bool;
}

#[derive(Debug, Default)]
struct WaiterFlags {
    signaled: bool,
    abandoned: bool,
}

/// One-shot blocking handle for a queued lock acquisition.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::sync::{SharedExclusiveLock, Waiter};
/// use std::sync::Arc;
///
/// let lock = SharedExclusiveLock::new();
/// let waiter = Arc::new(Waiter::new());
/// if !lock.acquire_read(&waiter, true) {
///     waiter.wait();
/// }
/// lock.release_read()?;
/// ```
#[derive(Debug, Default)]
pub struct Waiter {
    flags: Mutex<WaiterFlags>,
    cond: Condvar,
}

impl Waiter {
    /// Creates an unsignaled waiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the waiter is signaled.
    pub fn wait(&self) {
        let mut flags = self.flags.lock();
        while !flags.signaled {
            self.cond.wait(&mut flags);
        }
    }

    /// Blocks until signaled or until `timeout` elapses.
    ///
    /// Returns true if the waiter was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut flags = self.flags.lock();
        if !flags.signaled {
            self.cond.wait_while_for(&mut flags, |f| !f.signaled, timeout);
        }
        flags.signaled
    }

    /// Returns true once the waiter has been signaled.
    pub fn is_signaled(&self) -> bool {
        self.flags.lock().signaled
    }

    /// Marks the waiter as abandoned so a later dispatch skips it.
    ///
    /// Returns `false` if the signal already arrived: the grant then belongs
    /// to the caller, who must release it.
    pub fn abandon(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.signaled {
            return false;
        }
        flags.abandoned = true;
        true
    }
}

impl WaitSignal for Waiter {
    fn signal(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.abandoned {
            return false;
        }
        flags.signaled = true;
        self.cond.notify_one();
        true
    }
}

struct PendingAcquire {
    waiter: Arc<dyn WaitSignal>,
    is_read: bool,
}

/// Reader/writer lock with a manual FIFO wait queue.
///
/// Used to gate partition lifecycle operations (closing idle files) against
/// in-flight readers. Blocking is the caller's job: `acquire_*` either
/// succeeds immediately or returns `false`, after which the caller waits on
/// the handle it passed in.
pub struct SharedExclusiveLock {
    read_refs: AtomicI64,
    queue_length: AtomicUsize,
    queue: Mutex<VecDeque<PendingAcquire>>,
}

impl Default for SharedExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedExclusiveLock")
            .field("read_refs", &self.read_refs())
            .field("queue_length", &self.queue_length())
            .finish()
    }
}

impl SharedExclusiveLock {
    /// Creates an unlocked lock with an empty queue.
    pub fn new() -> Self {
        Self {
            read_refs: AtomicI64::new(0),
            queue_length: AtomicUsize::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the raw lock state: `0` free, `N > 0` readers, `-1` exclusive.
    pub fn read_refs(&self) -> i64 {
        self.read_refs.load(Ordering::Acquire)
    }

    /// Returns the number of queued acquisitions.
    pub fn queue_length(&self) -> usize {
        self.queue_length.load(Ordering::Acquire)
    }

    /// Attempts a shared acquisition.
    ///
    /// Succeeds whenever no exclusive holder is present. When blocked and
    /// `enqueue_if_blocked` is set, `waiter` is queued and will be signaled
    /// once the lock has been granted on its behalf. Returns `false` in every
    /// blocked case.
    pub fn acquire_read<W>(&self, waiter: &Arc<W>, enqueue_if_blocked: bool) -> bool
    where
        W: WaitSignal + 'static,
    {
        if self.try_acquire_shared() {
            return true;
        }
        if !enqueue_if_blocked {
            return false;
        }

        let mut queue = self.queue.lock();
        // The holder may have released between the fast path and taking the
        // queue; its dispatch could already have run against an empty queue.
        if self.try_acquire_shared() {
            return true;
        }
        queue.push_back(PendingAcquire {
            waiter: Arc::clone(waiter) as Arc<dyn WaitSignal>,
            is_read: true,
        });
        self.queue_length.fetch_add(1, Ordering::AcqRel);
        false
    }

    /// Attempts an exclusive acquisition.
    ///
    /// Succeeds only by moving the state from exactly `0` to `-1`.
    pub fn acquire_write<W>(&self, waiter: &Arc<W>, enqueue_if_blocked: bool) -> bool
    where
        W: WaitSignal + 'static,
    {
        if self.try_acquire_exclusive() {
            return true;
        }
        if !enqueue_if_blocked {
            return false;
        }

        let mut queue = self.queue.lock();
        if self.try_acquire_exclusive() {
            return true;
        }
        queue.push_back(PendingAcquire {
            waiter: Arc::clone(waiter) as Arc<dyn WaitSignal>,
            is_read: false,
        });
        self.queue_length.fetch_add(1, Ordering::AcqRel);
        false
    }

    /// Releases one shared hold.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] if no shared hold exists.
    pub fn release_read(&self) -> Result<()> {
        let mut current = self.read_refs.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return Err(JournalError::InvalidState(format!(
                    "release_read with read_refs={}",
                    current
                )));
            }
            match self.read_refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current == 1 {
            self.dispatch_queue();
        }
        Ok(())
    }

    /// Releases the exclusive hold.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidState`] if the lock is not held exclusively.
    pub fn release_write(&self) -> Result<()> {
        if let Err(actual) =
            self.read_refs
                .compare_exchange(EXCLUSIVE, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            return Err(JournalError::InvalidState(format!(
                "release_write with read_refs={}",
                actual
            )));
        }
        self.dispatch_queue();
        Ok(())
    }

    /// Acquires a shared hold, blocking until granted.
    pub fn read(&self) -> SharedGuard<'_> {
        let waiter = Arc::new(Waiter::new());
        if !self.acquire_read(&waiter, true) {
            waiter.wait();
        }
        SharedGuard { lock: self }
    }

    /// Acquires the exclusive hold, blocking until granted.
    pub fn write(&self) -> ExclusiveGuard<'_> {
        let waiter = Arc::new(Waiter::new());
        if !self.acquire_write(&waiter, true) {
            waiter.wait();
        }
        ExclusiveGuard { lock: self }
    }

    /// Acquires a shared hold without queueing.
    pub fn try_read(&self) -> Option<SharedGuard<'_>> {
        self.try_acquire_shared().then(|| SharedGuard { lock: self })
    }

    /// Acquires the exclusive hold without queueing.
    pub fn try_write(&self) -> Option<ExclusiveGuard<'_>> {
        self.try_acquire_exclusive()
            .then(|| ExclusiveGuard { lock: self })
    }

    /// Acquires a shared hold that keeps the lock alive, blocking until granted.
    pub fn read_arc(self: &Arc<Self>) -> ArcSharedGuard {
        let waiter = Arc::new(Waiter::new());
        if !self.acquire_read(&waiter, true) {
            waiter.wait();
        }
        ArcSharedGuard {
            lock: Arc::clone(self),
        }
    }

    fn try_acquire_shared(&self) -> bool {
        let mut current = self.read_refs.load(Ordering::Acquire);
        while current >= 0 {
            match self.read_refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    fn try_acquire_exclusive(&self) -> bool {
        self.read_refs
            .compare_exchange(0, EXCLUSIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn dispatch_queue(&self) {
        let mut queue = self.queue.lock();
        if self.read_refs.load(Ordering::Acquire) != 0 {
            return;
        }

        while let Some(head) = queue.front() {
            let is_read = head.is_read;
            let granted = if is_read {
                self.try_acquire_shared()
            } else {
                self.try_acquire_exclusive()
            };
            if !granted {
                break;
            }

            let Some(pending) = queue.pop_front() else {
                break;
            };
            self.queue_length.fetch_sub(1, Ordering::AcqRel);

            if pending.waiter.signal() {
                if !is_read {
                    break;
                }
                continue;
            }

            debug!(is_read, "skipping abandoned lock waiter");
            if is_read {
                self.read_refs.fetch_sub(1, Ordering::AcqRel);
            } else {
                self.read_refs.store(0, Ordering::Release);
            }
        }
    }
}

/// Shared hold released on drop.
#[must_use = "the shared hold is released when the guard is dropped"]
pub struct SharedGuard<'a> {
    lock: &'a SharedExclusiveLock,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_read() {
            error!("shared guard release failed: {}", err);
        }
    }
}

/// Exclusive hold released on drop.
#[must_use = "the exclusive hold is released when the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    lock: &'a SharedExclusiveLock,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_write() {
            error!("exclusive guard release failed: {}", err);
        }
    }
}

/// Shared hold over an `Arc`-owned lock, released on drop.
#[must_use = "the shared hold is released when the guard is dropped"]
pub struct ArcSharedGuard {
    lock: Arc<SharedExclusiveLock>,
}

impl fmt::Debug for ArcSharedGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcSharedGuard")
            .field("lock", &self.lock)
            .finish()
    }
}

impl Drop for ArcSharedGuard {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release_read() {
            error!("shared guard release failed: {}", err);
        }
    }
}
