// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task failure.

use std::any::Any;
use std::fmt;
use std::panic;

use thiserror::Error;

/// Panic payload type carried by failed tasks.
pub type Payload = Box<dyn Any + Send + 'static>;

/// A task bound to a failure context panicked.
///
/// Carries the original payload so the waiter can resume the panic
/// unchanged.
#[derive(Error)]
#[error("task panicked: {}", panic_message(.payload))]
pub struct TaskPanic {
    payload: Payload,
}

impl TaskPanic {
    pub(crate) fn new(payload: Payload) -> Self {
        Self { payload }
    }

    /// The panic message, if the payload was a string.
    pub fn message(&self) -> String {
        panic_message(&self.payload)
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Continue unwinding with the original payload.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for TaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPanic")
            .field("message", &self.message())
            .finish()
    }
}

fn panic_message(payload: &Payload) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_from_str_and_string() {
        let p = TaskPanic::new(Box::new("boom"));
        assert_eq!(p.message(), "boom");
        assert_eq!(p.to_string(), "task panicked: boom");

        let p = TaskPanic::new(Box::new(format!("code {}", 7)));
        assert_eq!(p.message(), "code 7");
    }

    #[test]
    fn opaque_payload() {
        let p = TaskPanic::new(Box::new(42u32));
        assert_eq!(p.message(), "unknown panic");
        assert_eq!(*p.into_payload().downcast::<u32>().unwrap(), 42);
    }
}
