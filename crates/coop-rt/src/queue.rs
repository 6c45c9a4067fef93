// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-stealing task queues.
//!
//! Per-worker bounded deque + global injection queue. Workers steal from
//! each other when idle. Threads inside an isolation scope only take tasks
//! that the scope admits, so every removal has a filtered variant.
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::arena::IsolationTag;
use crate::task::Task;

/// Per-worker local queue. Mutex-protected VecDeque.
///
/// Owner pushes/pops from the front, stealers take from the back.
///
/// Bounded to `CAPACITY` entries. Overflow goes to the global queue.
pub(crate) struct LocalQueue {
    deque: Mutex<VecDeque<Task>>,
}

/// Max tasks in a single worker's local queue before overflow.
pub(crate) const CAPACITY: usize = 1024;

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    /// Push a task. Returns Err if the queue is full.
    pub fn push(&self, task: Task) -> Result<(), Task> {
        let mut q = lock(&self.deque);
        if q.len() >= CAPACITY {
            return Err(task);
        }
        q.push_front(task);
        Ok(())
    }

    /// Pop the newest task the isolation admits (owner's path).
    pub fn pop(&self, isolation: IsolationTag) -> Option<Task> {
        let mut q = lock(&self.deque);
        let pos = q.iter().position(|t| isolation.admits(t.isolation()))?;
        q.remove(pos)
    }

    /// Steal the oldest task the isolation admits.
    pub fn steal(&self, isolation: IsolationTag) -> Option<Task> {
        let mut q = lock(&self.deque);
        let pos = q.iter().rposition(|t| isolation.admits(t.isolation()))?;
        q.remove(pos)
    }

    /// Steal half the queue from the back. Only used by unisolated
    /// workers, so every task is eligible.
    pub fn steal_batch(&self) -> Vec<Task> {
        let mut q = lock(&self.deque);
        let count = (q.len() / 2).max(q.len().min(1));
        let mut stolen = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(task) = q.pop_back() {
                stolen.push(task);
            }
        }
        stolen
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.deque).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.deque).is_empty()
    }
}

/// Global injection queue. External spawns and overflow land here.
/// All workers check this when their local queue is empty.
pub(crate) struct InjectorQueue {
    queue: Mutex<VecDeque<Task>>,
}

impl InjectorQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: Task) {
        lock(&self.queue).push_back(task);
    }

    /// Pop the oldest task the isolation admits.
    pub fn pop(&self, isolation: IsolationTag) -> Option<Task> {
        let mut q = lock(&self.queue);
        let pos = q.iter().position(|t| isolation.admits(t.isolation()))?;
        q.remove(pos)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }
}

/// Queue mutexes never stay poisoned: tasks run outside the lock.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::{FailureContext, WaitContext};
    use std::sync::Arc;

    fn tagged(tag: IsolationTag) -> Task {
        Task::new(
            Box::new(|| {}),
            Arc::new(WaitContext::new(1)),
            Arc::new(FailureContext::new()),
            tag,
        )
    }

    fn dummy_task() -> Task {
        tagged(IsolationTag::NONE)
    }

    #[test]
    fn local_queue_push_pop() {
        let q = LocalQueue::new();
        q.push(dummy_task()).unwrap();
        assert!(!q.is_empty());
        assert!(q.pop(IsolationTag::NONE).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn local_queue_overflow() {
        let q = LocalQueue::new();
        for _ in 0..CAPACITY {
            q.push(dummy_task()).unwrap();
        }
        assert!(q.push(dummy_task()).is_err());
    }

    #[test]
    fn local_queue_steal_batch() {
        let q = LocalQueue::new();
        for _ in 0..10 {
            q.push(dummy_task()).unwrap();
        }
        let stolen = q.steal_batch();
        assert_eq!(stolen.len(), 5); // Half
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn local_queue_steal_at_least_one() {
        let q = LocalQueue::new();
        q.push(dummy_task()).unwrap();
        assert_eq!(q.steal_batch().len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn isolated_pop_skips_foreign_tasks() {
        let tag = IsolationTag::fresh();
        let q = LocalQueue::new();
        q.push(dummy_task()).unwrap();
        q.push(tagged(tag)).unwrap();
        q.push(dummy_task()).unwrap();

        let other = IsolationTag::fresh();
        assert!(q.pop(other).is_none());
        assert!(q.steal(other).is_none());

        let t = q.steal(tag).unwrap();
        assert_eq!(t.isolation(), tag);
        assert!(q.pop(tag).is_none());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn unisolated_takes_anything() {
        let q = InjectorQueue::new();
        q.push(tagged(IsolationTag::fresh()));
        q.push(dummy_task());
        assert_eq!(q.len(), 2);
        assert!(q.pop(IsolationTag::NONE).is_some());
        assert!(q.pop(IsolationTag::NONE).is_some());
        assert!(q.is_empty());
    }
}
