// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-stealing scheduler.
//!
//! N worker threads each own a local queue. When idle, workers steal
//! from peers or the global injection queue, then park briefly.
//! Threads waiting on a counter inside the arena use the same queues
//! through `SharedState::find_task`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use crate::arena::{self, Arena, IsolationTag};
use crate::config::SchedulerConfig;
use crate::queue::{InjectorQueue, LocalQueue};
use crate::task::Task;

/// Worker pool with its own arena.
///
/// Shuts down on drop (waits for all outstanding tasks).
pub struct Scheduler {
    /// Worker handles for join-on-shutdown.
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Shared state visible to all workers.
    shared: Arc<SharedState>,
}

/// State shared between workers, waiting threads, and external spawners.
pub(crate) struct SharedState {
    /// Per-worker local queues. Index = worker id.
    pub local_queues: Vec<LocalQueue>,
    /// Overflow / external spawn queue.
    pub global_queue: InjectorQueue,
    /// Number of scheduled, not yet finished tasks.
    pub active_tasks: AtomicUsize,
    /// Signal for shutdown waiting on active tasks.
    pub all_done: (Mutex<()>, Condvar),
    /// Shutdown flag for workers.
    pub shutdown: AtomicBool,
    /// Number of workers.
    pub worker_count: usize,
    /// Idle workers park here until new work is scheduled.
    pub work_available: (Mutex<()>, Condvar),
    pub park_timeout: Duration,
}

impl Scheduler {
    /// Start the scheduler's worker threads.
    pub fn new(config: SchedulerConfig) -> Self {
        let worker_count = config.resolved_workers();

        let shared = Arc::new(SharedState {
            local_queues: (0..worker_count).map(|_| LocalQueue::new()).collect(),
            global_queue: InjectorQueue::new(),
            active_tasks: AtomicUsize::new(0),
            all_done: (Mutex::new(()), Condvar::new()),
            shutdown: AtomicBool::new(false),
            worker_count,
            work_available: (Mutex::new(()), Condvar::new()),
            park_timeout: config.park_timeout,
        });

        let mut worker_handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = shared.clone();
            worker_handles.push(
                thread::Builder::new()
                    .name(format!("{}-{}", config.thread_name, id))
                    .spawn(move || worker_loop(id, shared))
                    .expect("failed to spawn worker thread"),
            );
        }
        log::debug!("scheduler started with {} workers", worker_count);

        Self {
            workers: Mutex::new(worker_handles),
            shared,
        }
    }

    pub fn arena(&self) -> Arena {
        Arena::from_shared(self.shared.clone())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Shut down the scheduler. Waits for all active tasks, then stops
    /// and joins the workers.
    pub fn shutdown(&self) {
        {
            let (lock, cvar) = &self.shared.all_done;
            let mut guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            while self.shared.active_tasks.load(Ordering::Acquire) > 0 {
                guard = cvar
                    .wait_timeout(guard, self.shared.park_timeout)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
        }

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.notify(true);

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        log::debug!("scheduler with {} workers shut down", self.shared.worker_count);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

/// The process-wide scheduler used by threads not attached to any arena.
/// Started on first use with `SchedulerConfig::from_env()`.
pub fn default_scheduler() -> &'static Scheduler {
    static DEFAULT: OnceLock<Scheduler> = OnceLock::new();
    DEFAULT.get_or_init(|| Scheduler::new(SchedulerConfig::from_env()))
}

impl SharedState {
    /// Enqueue a task. Workers of this arena push locally; everyone else
    /// goes through the injector.
    pub fn schedule(&self, task: Task) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);

        let local = arena::current()
            .filter(|a| std::ptr::eq(Arc::as_ptr(&a.shared), self))
            .and_then(|a| a.worker);
        let overflow = match local {
            Some(id) => self.local_queues[id].push(task).err(),
            None => Some(task),
        };
        if let Some(task) = overflow {
            self.global_queue.push(task);
        }

        self.notify(false);
    }

    /// Find a task the isolation admits: own queue, then peers, then the
    /// injector.
    pub fn find_task(&self, worker: Option<usize>, isolation: IsolationTag) -> Option<Task> {
        if let Some(id) = worker {
            if let Some(task) = self.local_queues[id].pop(isolation) {
                return Some(task);
            }
        }

        let start = worker.map_or(0, |id| id + 1);
        for i in 0..self.worker_count {
            let victim = (start + i) % self.worker_count;
            if Some(victim) == worker {
                continue;
            }
            if let Some(task) = self.local_queues[victim].steal(isolation) {
                return Some(task);
            }
        }

        self.global_queue.pop(isolation)
    }

    /// Execute a task taken from this arena's queues.
    pub fn run_task(&self, task: Task) {
        task.execute();

        let prev = self.active_tasks.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            let (lock, cvar) = &self.all_done;
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            cvar.notify_all();
        }
    }

    fn notify(&self, all: bool) {
        let (lock, cvar) = &self.work_available;
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if all {
            cvar.notify_all();
        } else {
            cvar.notify_one();
        }
    }
}

/// Simple xorshift64 for random victim selection.
fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// Worker main loop.
fn worker_loop(id: usize, shared: Arc<SharedState>) {
    arena::bind_worker(shared.clone(), id);
    let local = &shared.local_queues[id];
    let mut rng = (id as u64).wrapping_add(0x9E3779B97F4A7C15); // Golden ratio hash

    loop {
        // 1. Local queue (fast path).
        if let Some(task) = local.pop(IsolationTag::NONE) {
            shared.run_task(task);
            continue;
        }

        // 2. Steal half of a random victim's queue.
        if shared.worker_count > 1 {
            let victim = (xorshift64(&mut rng) as usize) % shared.worker_count;
            if victim != id {
                let mut stolen = shared.local_queues[victim].steal_batch().into_iter();
                if let Some(first) = stolen.next() {
                    for task in stolen {
                        if let Err(task) = local.push(task) {
                            shared.global_queue.push(task);
                        }
                    }
                    shared.run_task(first);
                    continue;
                }
            }
        }

        // 3. Global injection queue.
        if let Some(task) = shared.global_queue.pop(IsolationTag::NONE) {
            shared.run_task(task);
            continue;
        }

        // 4. Check shutdown before sleeping.
        if shared.shutdown.load(Ordering::Acquire) {
            while let Some(task) = local.pop(IsolationTag::NONE) {
                shared.run_task(task);
            }
            break;
        }

        // 5. Park until new work arrives.
        let (lock, cvar) = &shared.work_available;
        // Queues are rechecked under the lock: `notify` takes it after
        // pushing, so a push can't slip in between check and park.
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if !shared.global_queue.is_empty() || !local.is_empty() {
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let _ = cvar
            .wait_timeout(guard, shared.park_timeout)
            .unwrap_or_else(|e| e.into_inner());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::{FailureContext, WaitContext};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn counting_task(counter: &Arc<AtomicI32>, ctx: &Arc<WaitContext>) -> Task {
        let c = counter.clone();
        ctx.reserve(1);
        Task::new(
            Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
            ctx.clone(),
            Arc::new(FailureContext::new()),
            IsolationTag::NONE,
        )
    }

    #[test]
    fn scheduler_spawn_and_shutdown() {
        let sched = Scheduler::new(SchedulerConfig::with_workers(2));
        let counter = Arc::new(AtomicI32::new(0));
        let ctx = Arc::new(WaitContext::new(0));

        for _ in 0..10 {
            sched.shared.schedule(counting_task(&counter, &ctx));
        }

        sched.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert!(ctx.is_done());
    }

    #[test]
    fn scheduler_default_workers() {
        // Verify it starts without panicking with 0 (auto-detect).
        let sched = Scheduler::new(SchedulerConfig::default());
        assert!(sched.worker_count() >= 1);
        sched.shutdown();
    }

    #[test]
    fn external_thread_can_drain_queues() {
        let sched = Scheduler::new(SchedulerConfig::with_workers(1));
        let counter = Arc::new(AtomicI32::new(0));
        let ctx = Arc::new(WaitContext::new(0));
        for _ in 0..4 {
            sched.shared.schedule(counting_task(&counter, &ctx));
        }
        while let Some(task) = sched.shared.find_task(None, IsolationTag::NONE) {
            sched.shared.run_task(task);
        }
        sched.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn drop_shuts_down() {
        let counter = Arc::new(AtomicI32::new(0));
        let ctx = Arc::new(WaitContext::new(0));
        {
            let sched = Scheduler::new(SchedulerConfig::with_workers(2));
            for _ in 0..8 {
                sched.shared.schedule(counting_task(&counter, &ctx));
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn schedule_wakes_parked_worker() {
        // Long enough that only a notify can wake the worker in time.
        let config = SchedulerConfig {
            park_timeout: Duration::from_secs(30),
            ..SchedulerConfig::with_workers(1)
        };
        let sched = Scheduler::new(config);
        thread::sleep(Duration::from_millis(50));

        let counter = Arc::new(AtomicI32::new(0));
        let ctx = Arc::new(WaitContext::new(0));
        sched.shared.schedule(counting_task(&counter, &ctx));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctx.is_done() {
            assert!(Instant::now() < deadline, "parked worker never woke");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        sched.shutdown();
    }
}
