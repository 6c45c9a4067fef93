// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Collaborative call-once for code running on a work-stealing scheduler.
//!
//! A mutex-based once blocks every late arrival. On a worker thread that
//! takes the worker out of the pool, and if the initializer itself spawns
//! stealable work the pool can stall. Here late arrivals instead execute
//! the initializer's stealable work until it finishes.
//!
//! ```
//! use coop_once::OnceFlag;
//!
//! static TABLES: OnceFlag = OnceFlag::new();
//!
//! TABLES.call_once(|| {
//!     // build tables, possibly spawning work through coop_rt::TaskGroup
//! });
//! assert!(TABLES.is_completed());
//! ```

mod flag;
mod runner;
mod state;

pub use flag::OnceFlag;
pub use state::{FlagState, MAX_ASSISTING};

/// Run `f` exactly once over the lifetime of `flag`. See
/// [`OnceFlag::call_once`].
pub fn collaborative_call_once<F: FnOnce()>(flag: &OnceFlag, f: F) {
    flag.call_once(f)
}

/// Fallible form of [`collaborative_call_once`]. See
/// [`OnceFlag::try_call_once`].
pub fn try_collaborative_call_once<F, E>(flag: &OnceFlag, f: F) -> Result<(), E>
where
    F: FnOnce() -> Result<(), E>,
{
    flag.try_call_once(f)
}
