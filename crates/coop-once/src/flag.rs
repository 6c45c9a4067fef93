// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Collaborative once flag.
//!
//! The first caller to move the flag out of `Uninitialized` is the winner:
//! it runs the initializer. Callers arriving while it runs register on the
//! flag, take a reference on the winner's runner, and execute the
//! initializer's stealable work until it finishes. Nobody blocks a worker
//! thread on a lock.
//!
//! A failed initializer puts the flag back to `Uninitialized`; only the
//! winner of that attempt sees the failure.

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use coop_rt::{spin_wait_while, spin_wait_while_eq};

use crate::runner::{self, Failure, LocalRunner};
use crate::state::{self, FlagState, DONE, UNINITIALIZED};

/// One-time initialization token for code running on a work-stealing
/// scheduler.
///
/// Calling into the same flag from inside its own initializer deadlocks.
pub struct OnceFlag {
    state: AtomicUsize,
}

impl OnceFlag {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(UNINITIALIZED),
        }
    }

    /// Has an initializer completed successfully?
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Snapshot of the state word.
    pub fn state(&self) -> FlagState {
        FlagState::decode(self.state.load(Ordering::Acquire))
    }

    /// Run `f` unless the flag is done. Every caller returns only after
    /// the initializer that was running has finished.
    ///
    /// If `f` panics, the flag is reset and the panic continues in the
    /// calling thread; other callers retry.
    pub fn call_once<F: FnOnce()>(&self, f: F) {
        let result: Result<(), Infallible> = self.try_call_once(|| {
            f();
            Ok(())
        });
        match result {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    /// Like `call_once`, for a fallible initializer. `Err` resets the flag
    /// and is returned to the caller whose attempt failed; threads that were
    /// assisting that attempt retry instead.
    pub fn try_call_once<F, E>(&self, f: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let mut expected = self.state.load(Ordering::Acquire);
        if expected == DONE {
            return Ok(());
        }

        let mut local: Option<LocalRunner> = None;
        while expected != DONE {
            if expected == UNINITIALIZED {
                let runner = local.get_or_insert_with(LocalRunner::new);
                let base = state::active(runner.index());
                match self.state.compare_exchange(
                    UNINITIALIZED,
                    base,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return self.run_winner(runner, base, f),
                    Err(actual) => expected = actual,
                }
            } else {
                expected = self.assist(expected);
            }
        }
        Ok(())
    }

    fn run_winner<F, E>(&self, runner: &mut LocalRunner, base: usize, f: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        log::trace!("runner {} won the flag", runner.index());
        runner.make_runner();

        let outcome = runner.run_once(f);
        match outcome {
            Ok(()) => {
                self.publish(base, DONE);
                log::trace!("runner {} finished, flag done", runner.index());
                Ok(())
            }
            Err(Failure::Error(e)) => {
                self.publish(base, UNINITIALIZED);
                log::debug!("initializer on runner {} failed, flag reset", runner.index());
                Err(e)
            }
            Err(Failure::Panicked(panic)) => {
                self.publish(base, UNINITIALIZED);
                log::debug!("initializer on runner {} panicked, flag reset", runner.index());
                panic.resume()
            }
        }
    }

    /// Move the flag from `base` to `next` once no assisting thread is
    /// registering against the winner's runner.
    fn publish(&self, base: usize, next: usize) {
        loop {
            spin_wait_while(&self.state, |word| word != base);
            if self
                .state
                .compare_exchange(base, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// One assisting pass against the active runner. Returns the state
    /// word to continue from.
    fn assist(&self, mut expected: usize) -> usize {
        loop {
            let saturated = state::saturated(expected);
            if expected == saturated {
                expected = spin_wait_while_eq(&self.state, saturated);
                continue;
            }
            if !state::is_active(expected) {
                return expected;
            }
            match self.state.compare_exchange(
                expected,
                expected + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => expected = actual,
            }
        }

        // Registered: the winner cannot leave `Active` until we deregister,
        // so the slot stays leased. Move protection over to the reference
        // count and free the admission for others.
        let runner = runner::get(state::runner_of(expected));
        runner.wait_for_init();
        runner.increase_ref();
        self.state.fetch_sub(1, Ordering::AcqRel);

        runner.assist();

        runner.decrease_ref();
        self.state.load(Ordering::Acquire)
    }
}

impl Default for OnceFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OnceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceFlag")
            .field("state", &self.state())
            .finish()
    }
}
