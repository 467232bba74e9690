//! Interval-throttled FIFO dispatch.
//!
//! A [`DispatchQueue`] admits work for one upstream host. Tasks run strictly
//! in enqueue order and the starts of two consecutive tasks are never closer
//! than the queue's interval. The queue only gates timing: it neither waits
//! for a task to finish nor looks at what the task did.
//!
//! ```text
//!  enqueue ──► pending (FIFO) ──► admission loop ──► task()
//!                                   │
//!                                   └─ sleeps until last_dispatch_at + interval
//! ```
//!
//! Time comes from `tokio::time`, so tests can drive the queue with a paused
//! clock.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};

use crate::routing::host_key::HostKey;

/// A deferred unit of work, run once when admitted.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Task>,
    last_dispatch_at: Option<Instant>,
    /// An admission loop is running for this queue.
    draining: bool,
}

pub struct DispatchQueue {
    key: HostKey,
    interval: Duration,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("key", &self.key)
            .field("interval", &self.interval)
            .field("pending", &self.pending())
            .finish()
    }
}

impl DispatchQueue {
    pub fn new(key: HostKey, interval: Duration) -> Self {
        Self {
            key,
            interval,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn key(&self) -> &HostKey {
        &self.key
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of tasks waiting for admission.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Start time of the most recent dispatch.
    pub fn last_dispatch_at(&self) -> Option<Instant> {
        self.lock().last_dispatch_at
    }

    /// Schedules `task` to run once every earlier task has started and the
    /// interval since the previous start has elapsed.
    ///
    /// A task enqueued on an idle queue whose interval has already elapsed
    /// runs before `enqueue` returns. Otherwise it runs on the queue's
    /// admission loop, which must be inside a tokio runtime.
    pub fn enqueue<F>(self: &Arc<Self>, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let mut state = self.lock();

        let idle = !state.draining && state.pending.is_empty();
        let due = state
            .last_dispatch_at
            .is_none_or(|last| last + self.interval <= now);

        if idle && due {
            state.last_dispatch_at = Some(now);
            drop(state);
            self.run(Box::new(task));
            return;
        }

        state.pending.push_back(Box::new(task));
        if !state.draining {
            state.draining = true;
            drop(state);
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain().await });
        }
    }

    /// Enqueues a task whose only job is to resolve the returned
    /// [`Admission`].
    ///
    /// If the `Admission` has been dropped by the time the task runs, the
    /// task does nothing; its slot still counts toward the interval.
    pub fn admit(self: &Arc<Self>) -> Admission {
        let (tx, rx) = oneshot::channel();
        let key = self.key.clone();
        self.enqueue(move || {
            if tx.send(Instant::now()).is_err() {
                tracing::debug!(host = %key, "Skipping dispatch, requester went away");
            }
        });
        Admission { rx }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let due = {
                let mut state = self.lock();
                if state.pending.is_empty() {
                    state.draining = false;
                    return;
                }
                state.last_dispatch_at.map(|last| last + self.interval)
            };

            if let Some(due) = due {
                sleep_until(due).await;
            }

            let task = {
                let mut state = self.lock();
                state.last_dispatch_at = Some(Instant::now());
                state.pending.pop_front()
            };

            if let Some(task) = task {
                self.run(task);
            }
        }
    }

    fn run(&self, task: Task) {
        tracing::trace!(host = %self.key, "Dispatching task");
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!(host = %self.key, "Dispatch task panicked");
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Tasks run outside the lock, so a poisoned lock still holds
        // consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves with the dispatch instant once the request is admitted.
///
/// Dropping it before admission turns the queued task into a no-op.
#[derive(Debug)]
pub struct Admission {
    rx: oneshot::Receiver<Instant>,
}

impl Admission {
    #[cfg(test)]
    pub(crate) fn from_receiver(rx: oneshot::Receiver<Instant>) -> Self {
        Self { rx }
    }
}

impl Future for Admission {
    type Output = Option<Instant>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
