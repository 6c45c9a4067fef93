// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Busy-wait helpers.
//!
//! Spin with exponential backoff, yielding the thread once spinning stops
//! paying off. Loads are `Acquire` so the caller sees whatever the writer
//! published before changing the value.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

/// An atomic cell that can be polled by the spin helpers.
pub trait Observe {
    type Value: Copy;

    fn observe(&self) -> Self::Value;
}

impl Observe for AtomicUsize {
    type Value = usize;

    fn observe(&self) -> usize {
        self.load(Ordering::Acquire)
    }
}

impl Observe for AtomicU64 {
    type Value = u64;

    fn observe(&self) -> u64 {
        self.load(Ordering::Acquire)
    }
}

impl Observe for AtomicBool {
    type Value = bool;

    fn observe(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Spin while `pred` holds for the current value. Returns the first value
/// for which it doesn't.
pub fn spin_wait_while<A, P>(atomic: &A, mut pred: P) -> A::Value
where
    A: Observe + ?Sized,
    P: FnMut(A::Value) -> bool,
{
    let backoff = Backoff::new();
    loop {
        let value = atomic.observe();
        if !pred(value) {
            return value;
        }
        backoff.snooze();
    }
}

/// Spin while the atomic equals `value`. Returns the new value.
pub fn spin_wait_while_eq<A>(atomic: &A, value: A::Value) -> A::Value
where
    A: Observe + ?Sized,
    A::Value: PartialEq,
{
    spin_wait_while(atomic, |current| current == value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn returns_immediately_when_not_equal() {
        let a = AtomicUsize::new(3);
        assert_eq!(spin_wait_while_eq(&a, 7), 3);
    }

    #[test]
    fn waits_for_change() {
        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            f.store(true, Ordering::Release);
        });
        assert!(spin_wait_while_eq(&*flag, false));
        h.join().unwrap();
    }

    #[test]
    fn predicate_sees_each_value() {
        let counter = Arc::new(AtomicUsize::new(5));
        let c = counter.clone();
        let h = thread::spawn(move || {
            for _ in 0..5 {
                thread::sleep(Duration::from_millis(1));
                c.fetch_sub(1, Ordering::Release);
            }
        });
        assert_eq!(spin_wait_while(&*counter, |v| v > 0), 0);
        h.join().unwrap();
    }
}
