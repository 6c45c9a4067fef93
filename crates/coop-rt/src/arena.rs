// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Arenas and isolation scopes.
//!
//! An arena is a handle to a scheduler's queues. A thread attached to an
//! arena spawns into it and, while waiting, steals from it. Workers are
//! attached to their own arena for life; other threads attach for the
//! duration of `Arena::execute`.
//!
//! Isolation restricts which tasks a thread may pick up while it waits:
//! inside `isolate(tag, ..)` only tasks spawned under `tag` are eligible.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::scheduler::{default_scheduler, SharedState};
use crate::task::Task;

/// Isolation token. `NONE` admits every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolationTag(usize);

impl IsolationTag {
    pub const NONE: IsolationTag = IsolationTag(0);

    /// A process-unique tag.
    pub fn fresh() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The calling thread's current isolation.
    pub fn current() -> Self {
        ISOLATION.with(|c| c.get())
    }

    /// May a thread under `self` run a task spawned under `task`?
    pub(crate) fn admits(self, task: IsolationTag) -> bool {
        self == Self::NONE || self == task
    }
}

/// Run `f` so that the thread only picks up tasks spawned under `tag`
/// while inside it. Tasks spawned from `f` inherit `tag`.
pub fn isolate<R, F: FnOnce() -> R>(tag: IsolationTag, f: F) -> R {
    let previous = ISOLATION.with(|c| c.replace(tag));
    let _restore = IsolationGuard { previous };
    f()
}

struct IsolationGuard {
    previous: IsolationTag,
}

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        ISOLATION.with(|c| c.set(self.previous));
    }
}

/// What a thread is attached to.
#[derive(Clone)]
pub(crate) struct Attachment {
    pub shared: Arc<SharedState>,
    /// Worker index when the thread is one of this arena's workers.
    pub worker: Option<usize>,
}

thread_local! {
    static ATTACHED: RefCell<Option<Attachment>> = const { RefCell::new(None) };
    static ISOLATION: Cell<IsolationTag> = const { Cell::new(IsolationTag::NONE) };
}

pub(crate) fn current() -> Option<Attachment> {
    ATTACHED.with(|c| c.borrow().clone())
}

/// Permanently attach a worker thread to its scheduler.
pub(crate) fn bind_worker(shared: Arc<SharedState>, id: usize) {
    ATTACHED.with(|c| {
        *c.borrow_mut() = Some(Attachment {
            shared,
            worker: Some(id),
        })
    });
}

struct AttachGuard {
    previous: Option<Attachment>,
}

impl AttachGuard {
    fn enter(attachment: Attachment) -> Self {
        let previous = ATTACHED.with(|c| c.replace(Some(attachment)));
        Self { previous }
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ATTACHED.with(|c| *c.borrow_mut() = previous);
    }
}

/// Handle to a scheduler's task queues.
#[derive(Clone)]
pub struct Arena {
    shared: Arc<SharedState>,
}

impl Arena {
    pub(crate) fn from_shared(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// The arena the calling thread is attached to, or the default
    /// scheduler's arena.
    pub fn attach() -> Self {
        match current() {
            Some(a) => Self { shared: a.shared },
            None => default_scheduler().arena(),
        }
    }

    /// Run `f` with the calling thread attached to this arena. The previous
    /// attachment is restored afterwards, also when `f` unwinds.
    pub fn execute<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let already_here = ATTACHED.with(|c| {
            c.borrow()
                .as_ref()
                .map_or(false, |a| Arc::ptr_eq(&a.shared, &self.shared))
        });
        if already_here {
            return f();
        }

        let _guard = AttachGuard::enter(Attachment {
            shared: self.shared.clone(),
            worker: None,
        });
        f()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    pub(crate) fn spawn(&self, task: Task) {
        self.shared.schedule(task);
    }
}

impl PartialEq for Arena {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Arena {}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("workers", &self.shared.worker_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;

    #[test]
    fn isolate_sets_and_restores() {
        let outer = IsolationTag::fresh();
        let inner = IsolationTag::fresh();
        assert_ne!(outer, inner);
        isolate(outer, || {
            assert_eq!(IsolationTag::current(), outer);
            isolate(inner, || assert_eq!(IsolationTag::current(), inner));
            assert_eq!(IsolationTag::current(), outer);
        });
        assert_eq!(IsolationTag::current(), IsolationTag::NONE);
    }

    #[test]
    fn isolate_restores_on_unwind() {
        let tag = IsolationTag::fresh();
        let r = std::panic::catch_unwind(|| isolate(tag, || panic!("inside")));
        assert!(r.is_err());
        assert_eq!(IsolationTag::current(), IsolationTag::NONE);
    }

    #[test]
    fn admits() {
        let tag = IsolationTag::fresh();
        assert!(IsolationTag::NONE.admits(tag));
        assert!(tag.admits(tag));
        assert!(!tag.admits(IsolationTag::NONE));
        assert!(!tag.admits(IsolationTag::fresh()));
    }

    #[test]
    fn execute_attaches_and_detaches() {
        let sched = Scheduler::new(SchedulerConfig::with_workers(1));
        let arena = sched.arena();
        assert!(current().is_none());
        arena.execute(|| {
            assert_eq!(Arena::attach(), arena);
            let nested = Scheduler::new(SchedulerConfig::with_workers(1));
            nested.arena().execute(|| assert_eq!(Arena::attach(), nested.arena()));
            assert_eq!(Arena::attach(), arena);
        });
        assert!(current().is_none());
        assert_eq!(arena.worker_count(), 1);
        sched.shutdown();
    }
}
