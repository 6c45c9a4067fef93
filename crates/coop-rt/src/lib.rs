// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative work-stealing runtime.
//!
//! Worker threads run closures pulled from per-worker deques and a global
//! injector. Threads that need to wait for work to finish don't block: they
//! keep executing stealable tasks until the thing they wait on completes.
//!
//! Components:
//! - `scheduler` — worker threads, local/global queues, default scheduler
//! - `arena`     — arena handles, thread attachment, isolation scopes
//! - `wait`      — completion counters, failure contexts, cooperative wait
//! - `group`     — task groups (spawn/wait/cancel)
//! - `spin`      — busy-wait helpers with backoff
//! - `config`    — scheduler configuration

pub mod arena;
pub mod config;
pub mod error;
pub mod group;
mod queue;
pub mod scheduler;
pub mod spin;
mod task;
pub mod wait;

pub use arena::{isolate, Arena, IsolationTag};
pub use config::SchedulerConfig;
pub use error::TaskPanic;
pub use group::TaskGroup;
pub use scheduler::{default_scheduler, Scheduler};
pub use spin::{spin_wait_while, spin_wait_while_eq};
pub use wait::{execute_and_wait, wait, FailureContext, WaitContext};
