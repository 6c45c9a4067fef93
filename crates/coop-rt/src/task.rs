// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task representation.
//!
//! A task is a boxed closure bound to a completion counter and a failure
//! context, tagged with the isolation it was spawned under.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::arena::{isolate, IsolationTag};
use crate::wait::{FailureContext, WaitContext};

pub(crate) type TaskFn = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Task {
    func: TaskFn,
    wait_ctx: Arc<WaitContext>,
    failure: Arc<FailureContext>,
    isolation: IsolationTag,
}

impl Task {
    /// The caller must already have reserved one unit on `wait_ctx`.
    pub fn new(
        func: TaskFn,
        wait_ctx: Arc<WaitContext>,
        failure: Arc<FailureContext>,
        isolation: IsolationTag,
    ) -> Self {
        Self {
            func,
            wait_ctx,
            failure,
            isolation,
        }
    }

    pub fn isolation(&self) -> IsolationTag {
        self.isolation
    }

    /// Run the closure under the task's isolation, record a panic into the
    /// failure context, then release the counter. Cancelled tasks only
    /// release.
    pub fn execute(self) {
        let Task {
            func,
            wait_ctx,
            failure,
            isolation,
        } = self;

        if !failure.is_cancelled() {
            let outcome = isolate(isolation, || panic::catch_unwind(AssertUnwindSafe(func)));
            if let Err(payload) = outcome {
                failure.record(payload);
            }
        }

        wait_ctx.release();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("isolation", &self.isolation)
            .field("cancelled", &self.failure.is_cancelled())
            .finish()
    }
}
