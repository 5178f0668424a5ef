//! One-shot delayed callbacks with token cancellation.
//!
//! Every callback handed to a [`Scheduler`] runs on the scheduler's apply
//! context, one at a time. The gesture state machine and the event
//! classifier rely on that: anything they dispatch or schedule is
//! serialized with everything else they dispatch or schedule.

mod apply;
mod manual;

use std::fmt;
use std::time::Duration;

pub use apply::{ApplyThread, TaskQueue, TokioScheduler};
pub use manual::ManualScheduler;

/// A unit of work executed on the apply context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one pending delayed callback.
///
/// Tokens are plain ids, unique per scheduler. Cancelling a token that
/// already fired does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivationToken(u64);

impl ActivationToken {
    /// Wrap a scheduler-assigned id.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The scheduler-assigned id.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActivationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runs callbacks once, after a delay, on a single serialization context.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`. Returns immediately.
    fn schedule_after(&self, delay: Duration, task: Task) -> ActivationToken;

    /// Prevent the task behind `token` from running if it has not started.
    fn cancel(&self, token: ActivationToken);

    /// Run `task` on the apply context as soon as possible.
    fn dispatch(&self, task: Task) {
        let _ = self.schedule_after(Duration::ZERO, task);
    }
}
