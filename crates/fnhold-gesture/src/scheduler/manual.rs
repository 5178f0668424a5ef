//! Virtual-clock scheduler.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::{ActivationToken, Scheduler, Task};

struct Entry {
    id: u64,
    deadline: Duration,
    task: Task,
}

#[derive(Default)]
struct Queue {
    now: Duration,
    next_id: u64,
    entries: Vec<Entry>,
}

impl Queue {
    /// Remove the earliest entry due at or before `until`. Ties go to the
    /// entry scheduled first.
    fn pop_due(&mut self, until: Duration) -> Option<Entry> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= until)
            .min_by_key(|(_, entry)| (entry.deadline, entry.id))
            .map(|(index, _)| index)?;
        Some(self.entries.remove(index))
    }
}

/// A [`Scheduler`] driven by hand.
///
/// Nothing runs until [`advance`](ManualScheduler::advance) or
/// [`run_pending`](ManualScheduler::run_pending) is called; due callbacks
/// then run on the calling thread, in deadline order. Callbacks may schedule
/// or cancel further work, and anything that becomes due within the same
/// advance runs too.
///
/// Scheduling and cancelling are thread-safe. Callers must not drive the
/// clock from two threads at once if they need callbacks serialized.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Queue>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, measured from creation.
    pub fn now(&self) -> Duration {
        self.queue.lock().now
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().entries.len()
    }

    /// Move the clock forward by `by`, running everything that becomes due.
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let until = self.queue.lock().now + by;
        let mut ran = 0;

        loop {
            // The lock is released before running, callbacks re-enter the
            // scheduler.
            let entry = {
                let mut queue = self.queue.lock();
                match queue.pop_due(until) {
                    Some(entry) => {
                        queue.now = queue.now.max(entry.deadline);
                        entry
                    }
                    None => {
                        queue.now = until;
                        break;
                    }
                }
            };
            trace!(token = entry.id, "running manual task");
            (entry.task)();
            ran += 1;
        }

        ran
    }

    /// Run everything already due without moving the clock.
    pub fn run_pending(&self) -> usize {
        self.advance(Duration::ZERO)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> ActivationToken {
        let mut queue = self.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        let deadline = queue.now + delay;
        queue.entries.push(Entry { id, deadline, task });
        ActivationToken::from_raw(id)
    }

    fn cancel(&self, token: ActivationToken) {
        self.queue
            .lock()
            .entries
            .retain(|entry| entry.id != token.raw());
    }
}
