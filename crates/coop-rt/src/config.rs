// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.

use std::time::Duration;

/// Environment variable overriding the default scheduler's worker count.
pub const WORKERS_ENV: &str = "COOP_RT_WORKERS";

/// How a `Scheduler` is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 means one per available core.
    pub workers: usize,
    /// Worker thread name prefix; the worker index is appended.
    pub thread_name: String,
    /// How long an idle worker parks before rechecking the queues.
    pub park_timeout: Duration,
}

impl SchedulerConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Defaults, with `COOP_RT_WORKERS` applied if it is set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = std::env::var(WORKERS_ENV).ok().as_deref().and_then(parse_workers) {
            config.workers = workers;
        }
        config
    }

    /// Worker count with 0 resolved against the machine.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}

/// Parse a `COOP_RT_WORKERS` value. Bad values are logged and ignored.
fn parse_workers(raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(e) => {
            log::warn!("ignoring {}={:?}: {}", WORKERS_ENV, raw, e);
            None
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name: "coop-worker".to_string(),
            park_timeout: Duration::from_millis(5),
        }
    }
}
