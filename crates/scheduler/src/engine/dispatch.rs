use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use tokio::sync::Notify;
use tracing::{debug, error, warn};

use timedtask_core::{Clock, DueKey};

use crate::stats::TaskStats;
use crate::task::Task;

use super::core::Scheduler;

// ── In-flight barrier ────────────────────────────────────────

/// Counts executions that have been dispatched but not finished, and lets
/// callers block (or await) until the count returns to zero.
#[derive(Debug, Default)]
pub(super) struct InFlight {
    count: Mutex<usize>,
    idle_cv: Condvar,
    idle: Notify,
}

impl InFlight {
    pub(super) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.lock() += 1;
        InFlightGuard {
            inner: Arc::clone(self),
        }
    }

    pub(super) fn count(&self) -> usize {
        *self.lock()
    }

    /// Block the calling thread until nothing is in flight.
    pub(super) fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .idle_cv
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait asynchronously until nothing is in flight.
    pub(super) async fn wait_idle_async(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent exit cannot slip between.
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn exit(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle_cv.notify_all();
            self.idle.notify_waiters();
        }
    }
}

/// Held by one execution; leaving the barrier happens on drop, so a task that
/// unwinds past its panic boundary still releases its slot.
#[derive(Debug)]
pub(super) struct InFlightGuard {
    inner: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.exit();
    }
}

// ── Dispatch ─────────────────────────────────────────────────

/// Result of one scan of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct DueScan<K> {
    /// Tasks handed to the executor.
    pub(super) dispatched: usize,
    /// Due key of the new root, if the queue is not empty.
    pub(super) next_due: Option<K>,
    pub(super) paused: bool,
}

enum Next<K: DueKey> {
    Due(Arc<Task<K>>),
    Idle(Option<K>),
    Paused,
}

fn run_task<K: DueKey>(task: &Task<K>, stats: &TaskStats) {
    let stat = stats.open(task.name());
    if let Err(e) = task.execute(stat) {
        // Panics are reported by the task itself.
        if !e.is_panic() {
            warn!(task = %task, error = %e, "task failed");
        }
    }
}

impl<C: Clock> Scheduler<C> {
    /// Pop the root if it is due at `now`.
    fn take_due(&self, now: C::Key) -> Next<C::Key> {
        let mut state = self.write_state();
        if state.paused {
            return Next::Paused;
        }
        match state.list.peek().map(|root| root.due()) {
            Some(due) if due <= now => match state.list.pop() {
                Some(task) => Next::Due(task),
                None => Next::Idle(None),
            },
            next => Next::Idle(next),
        }
    }

    /// Hand every task due at `now` to its own execution thread.
    pub(super) fn dispatch_due(&self, now: C::Key) -> DueScan<C::Key> {
        let mut dispatched = 0;
        loop {
            match self.take_due(now) {
                Next::Due(task) => {
                    self.note_delay(&task, now);
                    self.dispatch(task);
                    dispatched += 1;
                }
                Next::Idle(next_due) => {
                    if dispatched > 0 {
                        debug!(queue = %self.config.name, dispatched, "dispatched due tasks");
                    }
                    return DueScan {
                        dispatched,
                        next_due,
                        paused: false,
                    };
                }
                Next::Paused => {
                    return DueScan {
                        dispatched,
                        next_due: None,
                        paused: true,
                    };
                }
            }
        }
    }

    fn note_delay(&self, task: &Task<C::Key>, now: C::Key) {
        let late = self.clock.span(task.due(), now);
        if late > self.config.pop_delay() {
            self.delayed_pops.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue = %self.config.name,
                task = %task,
                late_ms = late.as_millis() as u64,
                "delayed pop"
            );
        }
    }

    /// Run one task on its own thread. Executions are not pooled, so a burst
    /// of due tasks runs fully in parallel.
    pub(super) fn dispatch(&self, task: Arc<Task<C::Key>>) {
        let guard = self.in_flight.enter();
        let stats = Arc::clone(&self.task_stats);
        self.act_stats.inc();

        let (spawned_task, spawned_stats) = (Arc::clone(&task), Arc::clone(&stats));
        let spawned = thread::Builder::new()
            .name(format!("{}-task", self.config.name))
            .spawn(move || {
                let _guard = guard;
                run_task(&spawned_task, &spawned_stats);
            });
        if let Err(e) = spawned {
            // The closure and its guard are dropped with the error.
            error!(
                queue = %self.config.name,
                task = %task,
                error = %e,
                "failed to spawn task thread, running inline"
            );
            let _guard = self.in_flight.enter();
            run_task(&task, &stats);
        }
    }

    // ── Flush / drain ────────────────────────────────────────

    /// Wait for in-flight executions, then run every task due at or before
    /// `till` on the calling thread, in due order. Returns how many ran.
    ///
    /// Runs regardless of the pause flag. This blocks the calling thread; from
    /// async code call it through `spawn_blocking`.
    pub fn flush_until(&self, till: C::Key) -> usize {
        self.in_flight.wait_idle();

        let mut ran = 0;
        loop {
            // Lock released before running so the task may touch the queue.
            let task = {
                let mut state = self.write_state();
                match state.list.peek() {
                    Some(root) if root.due() <= till => state.list.pop(),
                    _ => None,
                }
            };
            let Some(task) = task else { break };
            self.act_stats.inc();
            run_task(&task, &self.task_stats);
            ran += 1;
        }

        let mut state = self.write_state();
        self.rearm(&mut state);
        debug!(queue = %self.config.name, ran, remaining = state.list.len(), "flushed");
        ran
    }

    /// Block until no dispatched execution is still running.
    pub fn wait_idle(&self) {
        self.in_flight.wait_idle();
    }

    /// Await until no dispatched execution is still running.
    pub async fn drain(&self) {
        self.in_flight.wait_idle_async().await;
    }

    /// Executions dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn guard_drop_releases_barrier() {
        let in_flight = Arc::new(InFlight::new());
        let a = in_flight.enter();
        let b = in_flight.enter();
        assert_eq!(in_flight.count(), 2);

        drop(a);
        assert_eq!(in_flight.count(), 1);

        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            thread::spawn(move || in_flight.wait_idle())
        };
        thread::sleep(Duration::from_millis(20));
        drop(b);
        waiter.join().unwrap();
        assert_eq!(in_flight.count(), 0);
    }

    #[test]
    fn wait_idle_returns_immediately_when_empty() {
        InFlight::new().wait_idle();
    }

    #[tokio::test]
    async fn async_wait_idle_wakes_on_last_exit() {
        let in_flight = Arc::new(InFlight::new());
        let guard = in_flight.enter();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        tokio::time::timeout(Duration::from_secs(2), in_flight.wait_idle_async())
            .await
            .expect("barrier never released");
        releaser.await.unwrap();
    }
}
