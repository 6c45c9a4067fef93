// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion counters and cooperative waiting.
//!
//! A waiting thread never sleeps on the counter. While it is non-zero the
//! thread executes whatever stealable work its isolation admits.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::Backoff;

use crate::arena::{self, IsolationTag};
use crate::error::{Payload, TaskPanic};

/// Number of bound tasks that have not finished yet.
pub struct WaitContext {
    pending: AtomicUsize,
}

impl WaitContext {
    pub fn new(reserved: usize) -> Self {
        Self {
            pending: AtomicUsize::new(reserved),
        }
    }

    /// Account for `n` more tasks before scheduling them.
    pub fn reserve(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::AcqRel);
    }

    /// One bound task finished. Publishes its effects to whoever observes
    /// the counter at zero.
    pub fn release(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "WaitContext released more than reserved");
    }

    pub fn is_done(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for WaitContext {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for WaitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitContext")
            .field("pending", &self.pending())
            .finish()
    }
}

/// First failure of the tasks bound to it. Recording a failure cancels
/// the context: bound tasks that haven't started are skipped.
pub struct FailureContext {
    first: ArrayQueue<Payload>,
    cancelled: AtomicBool,
}

impl FailureContext {
    pub fn new() -> Self {
        Self {
            first: ArrayQueue::new(1),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Keep `payload` if it is the first failure; later ones are dropped.
    pub fn record(&self, payload: Payload) {
        let _ = self.first.push(payload);
        self.cancel();
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Take the recorded failure and reset the context for reuse.
    pub fn take(&self) -> Option<TaskPanic> {
        let failure = self.first.pop().map(TaskPanic::new);
        self.cancelled.store(false, Ordering::Release);
        failure
    }
}

impl Default for FailureContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureContext")
            .field("failed", &!self.first.is_empty())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Wait until `ctx` drains, executing stealable work meanwhile, then
/// report the first failure recorded in `failure`.
///
/// Steals from the arena the thread is attached to, restricted by its
/// current isolation. An unattached thread just spins.
pub fn wait(ctx: &WaitContext, failure: &FailureContext) -> Result<(), TaskPanic> {
    let attached = arena::current();
    let isolation = IsolationTag::current();
    let backoff = Backoff::new();

    while !ctx.is_done() {
        if let Some(a) = &attached {
            if let Some(task) = a.shared.find_task(a.worker, isolation) {
                a.shared.run_task(task);
                backoff.reset();
                continue;
            }
        }
        backoff.snooze();
    }

    match failure.take() {
        Some(panic) => Err(panic),
        None => Ok(()),
    }
}

/// Run `root` inline as the task accounted for by one reservation already
/// made on `ctx`, then wait for `ctx` to drain.
///
/// A panic in `root` is recorded in `failure` and reported by the wait.
pub fn execute_and_wait<F: FnOnce()>(
    root: F,
    ctx: &WaitContext,
    failure: &FailureContext,
) -> Result<(), TaskPanic> {
    if !failure.is_cancelled() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(root)) {
            failure.record(payload);
        }
    }
    ctx.release();
    wait(ctx, failure)
}
