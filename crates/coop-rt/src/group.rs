// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task groups: spawn stealable closures and wait for all of them.

use std::sync::Arc;

use crate::arena::{Arena, IsolationTag};
use crate::error::TaskPanic;
use crate::task::Task;
use crate::wait::{self, FailureContext, WaitContext};

/// A set of tasks sharing one completion counter and failure context.
///
/// Tasks inherit the spawning thread's isolation, so work spawned inside
/// an isolation scope can only be picked up by threads in that scope or
/// by idle workers.
#[derive(Debug)]
pub struct TaskGroup {
    arena: Arena,
    wait_ctx: Arc<WaitContext>,
    failure: Arc<FailureContext>,
}

impl TaskGroup {
    /// A group spawning into the calling thread's arena.
    pub fn new() -> Self {
        Self::with_arena(Arena::attach())
    }

    pub fn with_arena(arena: Arena) -> Self {
        Self {
            arena,
            wait_ctx: Arc::new(WaitContext::new(0)),
            failure: Arc::new(FailureContext::new()),
        }
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.wait_ctx.reserve(1);
        self.arena.spawn(Task::new(
            Box::new(f),
            self.wait_ctx.clone(),
            self.failure.clone(),
            IsolationTag::current(),
        ));
    }

    /// Wait for every spawned task, helping with stealable work meanwhile.
    /// Returns the first panic among them.
    pub fn wait(&self) -> Result<(), TaskPanic> {
        self.arena
            .execute(|| wait::wait(&self.wait_ctx, &self.failure))
    }

    /// Skip every task that has not started yet.
    pub fn cancel(&self) {
        self.failure.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure.is_cancelled()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if !self.wait_ctx.is_done() {
            let _ = self.wait();
        }
    }
}
