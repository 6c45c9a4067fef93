// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runners: per-attempt resources shared between the winner and the
//! threads assisting it.
//!
//! Runners live in a process-wide table so that a flag can name one by
//! index. Pages of the table are allocated on demand and never freed;
//! slot indices are recycled through a free list. A slot is leased by one
//! `LocalRunner` at a time, and the lease is what builds and tears down
//! the resource bundle.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use coop_rt::{
    execute_and_wait, isolate, spin_wait_while, spin_wait_while_eq, Arena, FailureContext,
    IsolationTag, TaskPanic, WaitContext,
};
use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;

const PAGE_BITS: usize = 6;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const MAX_PAGES: usize = 4096;

/// Most runners that can be leased at the same time.
pub(crate) const MAX_RUNNERS: usize = PAGE_SIZE * MAX_PAGES;

type Page = [CachePadded<Runner>; PAGE_SIZE];

struct RunnerTable {
    pages: [AtomicPtr<Page>; MAX_PAGES],
    next: AtomicUsize,
    free: SegQueue<usize>,
}

static TABLE: RunnerTable = RunnerTable::new();

impl RunnerTable {
    const fn new() -> Self {
        const NO_PAGE: AtomicPtr<Page> = AtomicPtr::new(ptr::null_mut());
        Self {
            pages: [NO_PAGE; MAX_PAGES],
            next: AtomicUsize::new(0),
            free: SegQueue::new(),
        }
    }

    fn acquire(&self) -> usize {
        if let Some(index) = self.free.pop() {
            return index;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        assert!(
            index < MAX_RUNNERS,
            "more than {} concurrent call-once attempts",
            MAX_RUNNERS
        );
        self.install_page(index >> PAGE_BITS);
        index
    }

    fn install_page(&self, page: usize) {
        let slot = &self.pages[page];
        if !slot.load(Ordering::Acquire).is_null() {
            return;
        }
        let fresh = Box::into_raw(Box::new(new_page()));
        if slot
            .compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `fresh` lost the race and was never published.
            drop(unsafe { Box::from_raw(fresh) });
        }
    }

    fn get(&self, index: usize) -> &Runner {
        let page = self.pages[index >> PAGE_BITS].load(Ordering::Acquire);
        assert!(!page.is_null(), "runner {} has no page", index);
        // SAFETY: installed pages are never freed or moved.
        unsafe { &(*page)[index & (PAGE_SIZE - 1)] }
    }

    fn release(&self, index: usize) {
        self.free.push(index);
    }
}

fn new_page() -> Page {
    std::array::from_fn(|_| CachePadded::new(Runner::new()))
}

/// The runner in slot `index`. Only meaningful while the caller holds an
/// admission on a flag whose state names that slot, or a reference.
pub(crate) fn get(index: usize) -> &'static Runner {
    TABLE.get(index)
}

/// Resources the winner builds for its attempt.
struct Resources {
    arena: Arena,
    isolation: IsolationTag,
    wait_ctx: WaitContext,
    failure: FailureContext,
}

enum Bundle {
    Empty,
    Ready(Resources),
}

pub(crate) struct Runner {
    /// Assisting threads currently inside `assist`.
    ref_count: AtomicUsize,
    /// Set once `bundle` is `Ready`.
    initialized: AtomicBool,
    bundle: UnsafeCell<Bundle>,
}

// SAFETY: `bundle` is written only by the lease holder, before
// `initialized` is published and after `ref_count` has drained. Between
// those points every thread only reads it.
unsafe impl Sync for Runner {}

impl Runner {
    fn new() -> Self {
        Self {
            ref_count: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            bundle: UnsafeCell::new(Bundle::Empty),
        }
    }

    pub fn wait_for_init(&self) {
        spin_wait_while_eq(&self.initialized, false);
    }

    pub fn increase_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrease_ref(&self) {
        self.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub fn references(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    fn resources(&self) -> &Resources {
        // SAFETY: callers observed `initialized` and keep the bundle alive
        // through the lease or a reference; see `unsafe impl Sync`.
        match unsafe { &*self.bundle.get() } {
            Bundle::Ready(resources) => resources,
            Bundle::Empty => unreachable!("runner used before it was made"),
        }
    }

    /// Help the winner: execute stealable work from its isolation until
    /// its initializer completes. Failures belong to the winner and are
    /// not seen here.
    pub fn assist(&self) {
        let res = self.resources();
        res.arena.execute(|| {
            isolate(res.isolation, || {
                let stub = FailureContext::new();
                let _ = coop_rt::wait(&res.wait_ctx, &stub);
            })
        });
    }
}

/// Why an attempt did not complete.
pub(crate) enum Failure<E> {
    Error(E),
    Panicked(TaskPanic),
}

/// One attempt's lease on a runner slot.
///
/// Dropping the lease waits until no assisting thread holds a reference,
/// then destroys the bundle (if it was ever made) and frees the slot.
pub(crate) struct LocalRunner {
    index: usize,
    runner: &'static Runner,
}

impl LocalRunner {
    pub fn new() -> Self {
        let index = TABLE.acquire();
        Self {
            index,
            runner: TABLE.get(index),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Build the bundle in the arena the winner is attached to. The wait
    /// context starts with the initializer already accounted for.
    pub fn make_runner(&mut self) {
        debug_assert!(!self.runner.initialized.load(Ordering::Relaxed));
        let resources = Resources {
            arena: Arena::attach(),
            isolation: IsolationTag::fresh(),
            wait_ctx: WaitContext::new(1),
            failure: FailureContext::new(),
        };
        // SAFETY: the lease is the only writer and `initialized` is still
        // false, so no assisting thread reads the bundle yet.
        unsafe { *self.runner.bundle.get() = Bundle::Ready(resources) };
        self.runner.initialized.store(true, Ordering::Release);
    }

    /// Run `f` inline inside the runner's arena and isolation, then help
    /// with its stealable work until all of it has finished.
    pub fn run_once<F, E>(&self, f: F) -> Result<(), Failure<E>>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let res = self.runner.resources();
        let mut outcome = Ok(());
        let waited = res.arena.execute(|| {
            isolate(res.isolation, || {
                execute_and_wait(|| outcome = f(), &res.wait_ctx, &res.failure)
            })
        });
        match waited {
            Err(panic) => Err(Failure::Panicked(panic)),
            Ok(()) => outcome.map_err(Failure::Error),
        }
    }
}

impl Drop for LocalRunner {
    fn drop(&mut self) {
        spin_wait_while(&self.runner.ref_count, |refs| refs > 0);
        if self.runner.initialized.load(Ordering::Acquire) {
            // SAFETY: no references remain and the flag no longer names
            // this slot, so nothing else can reach the bundle.
            let bundle = unsafe { std::mem::replace(&mut *self.runner.bundle.get(), Bundle::Empty) };
            self.runner.initialized.store(false, Ordering::Release);
            drop(bundle);
        }
        TABLE.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coop_rt::{Scheduler, SchedulerConfig, TaskGroup};
    use std::sync::Arc;

    #[test]
    fn slots_are_recycled() {
        let first = LocalRunner::new();
        let index = first.index();
        assert!(index < MAX_RUNNERS);
        let second = LocalRunner::new();
        assert_ne!(second.index(), index);
        drop(first);
        drop(second);
        // Other tests lease concurrently; the freed slot is reused
        // eventually, never handed out twice at once.
        let leases: Vec<_> = (0..8).map(|_| LocalRunner::new()).collect();
        let mut indices: Vec<_> = leases.iter().map(|l| l.index()).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 8);
    }

    #[test]
    fn unmade_lease_drops_cleanly() {
        let lease = LocalRunner::new();
        let runner = get(lease.index());
        assert!(!runner.initialized.load(Ordering::Acquire));
        drop(lease);
    }

    #[test]
    fn made_lease_publishes_init() {
        let mut lease = LocalRunner::new();
        let index = lease.index();
        lease.make_runner();
        get(index).wait_for_init();
        assert!(get(index).initialized.load(Ordering::Acquire));
        drop(lease);
    }

    #[test]
    fn run_once_reports_error_and_panic() {
        let mut lease = LocalRunner::new();
        lease.make_runner();
        match lease.run_once(|| Err::<(), _>("nope")) {
            Err(Failure::Error(e)) => assert_eq!(e, "nope"),
            _ => panic!("expected the initializer's error"),
        }

        let mut lease = LocalRunner::new();
        lease.make_runner();
        match lease.run_once(|| -> Result<(), ()> { panic!("init panic") }) {
            Err(Failure::Panicked(p)) => assert_eq!(p.message(), "init panic"),
            _ => panic!("expected a panic"),
        }
    }

    #[test]
    fn assist_returns_after_winner_finishes() {
        let sched = Scheduler::new(SchedulerConfig::with_workers(2));
        sched.arena().execute(|| {
            let mut lease = LocalRunner::new();
            lease.make_runner();
            let runner = get(lease.index());
            runner.increase_ref();

            let helper = std::thread::spawn(move || {
                runner.assist();
                runner.decrease_ref();
            });

            let done = Arc::new(AtomicUsize::new(0));
            let d = done.clone();
            lease
                .run_once(move || -> Result<(), ()> {
                    let group = TaskGroup::new();
                    for _ in 0..32 {
                        let d = d.clone();
                        group.spawn(move || {
                            d.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                    group.wait().map_err(|_| ())
                })
                .unwrap_or_else(|_| panic!("initializer failed"));

            helper.join().unwrap();
            assert_eq!(done.load(Ordering::Relaxed), 32);
            // Lease drop sees no references left.
            drop(lease);
        });
    }
}
