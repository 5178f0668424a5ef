//! Scheduler backed by a single-threaded tokio runtime.
//!
//! Every task, dispatched or delayed, reaches the apply context through one
//! unbounded channel drained by [`TaskQueue::run`]. Timers only decide when a
//! task is pushed, so tasks run in the order they were queued regardless of
//! which thread queued them or how tokio orders its own run queues.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tracing::{debug, error, trace};

use super::{ActivationToken, Scheduler, Task};

const APPLY_THREAD_NAME: &str = "fnhold-apply";

enum Message {
    Run(Task),
    Shutdown,
}

/// Delayed tasks that have neither run nor been cancelled. A task may only
/// run if it removes its own entry first, so whoever removes the entry wins
/// the race between running and cancellation.
#[derive(Default)]
struct Pending {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Option<AbortHandle>>>,
}

/// The receiving end of a [`TokioScheduler`].
pub struct TaskQueue {
    receiver: UnboundedReceiver<Message>,
}

impl TaskQueue {
    /// Run queued tasks in order until shutdown is requested or every
    /// scheduler handle is gone. Drive it from exactly one task.
    pub async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            match message {
                Message::Run(task) => task(),
                Message::Shutdown => break,
            }
        }
    }
}

/// A [`Scheduler`] whose tasks run wherever its [`TaskQueue`] is driven.
///
/// Timers are spawned onto `handle`; when one elapses its task is pushed to
/// the back of the queue.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
    queue: UnboundedSender<Message>,
    pending: Arc<Pending>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> (Self, TaskQueue) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            handle,
            queue,
            pending: Arc::new(Pending::default()),
        };
        (scheduler, TaskQueue { receiver })
    }

    /// Number of delayed tasks still waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.entries.lock().len()
    }

    fn push(&self, message: Message) {
        if self.queue.send(message).is_err() {
            trace!("apply queue closed, task dropped");
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) -> ActivationToken {
        let id = self.pending.next_id.fetch_add(1, Ordering::Relaxed);
        let token = ActivationToken::from_raw(id);
        self.pending.entries.lock().insert(id, None);

        // The claim happens when the task reaches the front of the queue, so
        // a cancel issued after the timer fired still wins.
        let claim: Task = {
            let pending = self.pending.clone();
            Box::new(move || {
                if pending.entries.lock().remove(&id).is_some() {
                    task();
                } else {
                    trace!(%token, "delayed task cancelled before running");
                }
            })
        };

        if delay.is_zero() {
            self.push(Message::Run(claim));
        } else {
            let queue = self.queue.clone();
            let join = self.handle.spawn(async move {
                tokio::time::sleep(delay).await;
                queue.send(Message::Run(claim)).ok();
            });
            if let Some(slot) = self.pending.entries.lock().get_mut(&id) {
                *slot = Some(join.abort_handle());
            }
        }

        trace!(%token, delay = ?delay, "delayed task scheduled");
        token
    }

    fn cancel(&self, token: ActivationToken) {
        match self.pending.entries.lock().remove(&token.raw()) {
            Some(abort) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                trace!(%token, "delayed task cancelled");
            }
            None => trace!(%token, "cancel ignored, task already started"),
        }
    }

    fn dispatch(&self, task: Task) {
        self.push(Message::Run(task));
    }
}

/// A dedicated thread running a current-thread tokio runtime.
///
/// This is the apply context of the application: every dispatched and
/// scheduled callback runs on this one thread, in the order it was queued.
/// Dropping the `ApplyThread` stops the runtime and joins the thread. Work
/// queued before that still runs; delayed tasks whose timer has not fired are
/// dropped.
pub struct ApplyThread {
    scheduler: TokioScheduler,
    thread: Option<JoinHandle<()>>,
}

impl ApplyThread {
    /// Start the apply thread.
    pub fn spawn() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let (scheduler, queue) = TokioScheduler::new(runtime.handle().clone());

        let thread = std::thread::Builder::new()
            .name(APPLY_THREAD_NAME.to_string())
            .spawn(move || {
                debug!("apply thread started");
                runtime.block_on(queue.run());
                debug!("apply thread stopped");
            })?;

        Ok(Self {
            scheduler,
            thread: Some(thread),
        })
    }

    /// A scheduler whose callbacks run on this thread.
    pub fn scheduler(&self) -> TokioScheduler {
        self.scheduler.clone()
    }

    /// Stop the runtime and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.scheduler.push(Message::Shutdown);
            if thread.join().is_err() {
                error!("apply thread panicked");
            }
        }
    }
}

impl Drop for ApplyThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
