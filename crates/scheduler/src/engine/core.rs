use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use timedtask_core::{Clock, DueKey, SchedulerConfig, TimedTaskError, WakeupStrategy};

use crate::rate::ActPerSec;
use crate::stats::TaskStats;
use crate::task::{Task, TaskFn};
use crate::task_list::TaskList;

use super::dispatch::InFlight;
use super::timer::{DeadlineTimer, Wakeup};

/// Everything guarded by the scheduler's read/write lock.
pub(super) struct QueueState<K: DueKey> {
    pub(super) list: TaskList<K>,
    pub(super) paused: bool,
    pub(super) timer: DeadlineTimer<K>,
}

/// Deferred-task scheduler. Owns a [`TaskList`] and runs due tasks
/// concurrently from a single background loop (see [`Scheduler::run`]).
///
/// The wakeup strategy comes from [`SchedulerConfig::strategy`]: a fixed
/// polling interval, or an adaptive timer re-aimed at the heap root after
/// every mutation that can change it.
pub struct Scheduler<C: Clock> {
    pub(super) config: SchedulerConfig,
    pub(super) clock: Arc<C>,
    /// Pending tasks, pause flag and armed deadline.
    pub(super) state: RwLock<QueueState<C::Key>>,
    /// Executions dispatched but not yet finished.
    pub(super) in_flight: Arc<InFlight>,
    /// Per-function execution statistics.
    pub(super) task_stats: Arc<TaskStats>,
    /// Dispatch throughput.
    pub(super) act_stats: Arc<ActPerSec>,
    /// Wakes the adaptive loop after a rearm.
    pub(super) wake: Notify,
    /// Pops observed later than the configured pop delay.
    pub(super) delayed_pops: AtomicU64,
}

impl<C: Clock> Scheduler<C> {
    /// Create a scheduler with the given config and clock.
    pub fn new(config: SchedulerConfig, clock: C) -> Self {
        Self {
            config,
            clock: Arc::new(clock),
            state: RwLock::new(QueueState {
                list: TaskList::new(),
                paused: false,
                timer: DeadlineTimer::new(),
            }),
            in_flight: Arc::new(InFlight::new()),
            task_stats: Arc::new(TaskStats::new()),
            act_stats: Arc::new(ActPerSec::new()),
            wake: Notify::new(),
            delayed_pops: AtomicU64::new(0),
        }
    }

    /// Scheduler that wakes every `interval`.
    pub fn polling(name: impl Into<String>, clock: C, interval: Duration) -> Self {
        Self::new(
            SchedulerConfig::new(name, WakeupStrategy::polling(interval)),
            clock,
        )
    }

    /// Scheduler that wakes exactly when the earliest task becomes due.
    pub fn adaptive(name: impl Into<String>, clock: C) -> Self {
        Self::new(SchedulerConfig::new(name, WakeupStrategy::Adaptive), clock)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn task_stats(&self) -> Arc<TaskStats> {
        Arc::clone(&self.task_stats)
    }

    pub fn act_stats(&self) -> Arc<ActPerSec> {
        Arc::clone(&self.act_stats)
    }

    pub(super) fn read_state(&self) -> RwLockReadGuard<'_, QueueState<C::Key>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write_state(&self) -> RwLockWriteGuard<'_, QueueState<C::Key>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Queue mutations ──────────────────────────────────────

    /// Enqueue a task.
    ///
    /// # Panics
    ///
    /// Pushing a task that is already enqueued is a contract violation and
    /// panics. Use [`Scheduler::try_push`] to get an error instead.
    pub fn push(&self, task: Arc<Task<C::Key>>) {
        if let Err(e) = self.try_push(task) {
            error!(queue = %self.config.name, error = %e, "tried to push a task twice");
            panic!("{} tried to push {}", self.config.name, e);
        }
    }

    /// Enqueue a task, failing with [`TimedTaskError::AlreadyEnqueued`] if it
    /// already sits in a queue.
    pub fn try_push(&self, task: Arc<Task<C::Key>>) -> Result<(), TimedTaskError> {
        let mut state = self.write_state();
        state.list.push(Arc::clone(&task))?;
        if !state.paused && state.list.peek().is_some_and(|root| Arc::ptr_eq(root, &task)) {
            self.rearm(&mut state);
        }
        Ok(())
    }

    /// Remove a pending task.
    pub fn remove(&self, task: &Arc<Task<C::Key>>) -> Result<(), TimedTaskError> {
        let mut state = self.write_state();
        let was_root = match state.list.peek() {
            Some(root) => Arc::ptr_eq(root, task),
            None => return Err(self.empty_queue("remove")),
        };
        state.list.remove(task)?;
        if was_root && !state.paused {
            self.rearm(&mut state);
        }
        Ok(())
    }

    /// Replace a pending task's argument, due key and function.
    pub fn update(
        &self,
        task: &Arc<Task<C::Key>>,
        argument: Value,
        due: C::Key,
        func: TaskFn<C::Key>,
    ) -> Result<(), TimedTaskError> {
        let mut state = self.write_state();
        let (old_root, old_due) = match state.list.peek() {
            Some(root) => (Arc::clone(root), root.due()),
            None => return Err(self.empty_queue("update")),
        };
        state.list.update(task, argument, due, func)?;

        let root_changed = state
            .list
            .peek()
            .is_some_and(|root| !Arc::ptr_eq(root, &old_root) || root.due() != old_due);
        if root_changed && !state.paused {
            self.rearm(&mut state);
        }
        Ok(())
    }

    /// Move a pending task to a new due key.
    pub fn update_due(&self, task: &Arc<Task<C::Key>>, due: C::Key) -> Result<(), TimedTaskError> {
        self.update(task, task.argument(), due, task.func())
    }

    /// Replace a pending task's argument and due key, keeping its function.
    pub fn update_argument_and_due(
        &self,
        task: &Arc<Task<C::Key>>,
        argument: Value,
        due: C::Key,
    ) -> Result<(), TimedTaskError> {
        self.update(task, argument, due, task.func())
    }

    /// Remove and return the earliest task regardless of its due key.
    pub fn pop(&self) -> Option<Arc<Task<C::Key>>> {
        let mut state = self.write_state();
        let task = state.list.pop()?;
        self.rearm(&mut state);
        Some(task)
    }

    pub fn peek(&self) -> Option<Arc<Task<C::Key>>> {
        self.read_state().list.peek().cloned()
    }

    pub fn len(&self) -> usize {
        self.read_state().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().list.is_empty()
    }

    fn empty_queue(&self, op: &'static str) -> TimedTaskError {
        TimedTaskError::EmptyQueue {
            queue: self.config.name.clone(),
            op,
        }
    }

    // ── Pause / resume ───────────────────────────────────────

    /// Stop dispatching. Idempotent.
    pub fn pause(&self) {
        let mut state = self.write_state();
        if state.paused {
            return;
        }
        state.paused = true;
        self.rearm(&mut state);
        info!(queue = %self.config.name, pending = state.list.len(), "paused");
    }

    /// Resume dispatching. Idempotent.
    pub fn resume(&self) {
        let mut state = self.write_state();
        if !state.paused {
            return;
        }
        state.paused = false;
        self.rearm(&mut state);
        info!(queue = %self.config.name, pending = state.list.len(), "resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.read_state().paused
    }

    // ── Adaptive timer ───────────────────────────────────────

    /// Aim the timer at the current root (or nowhere when empty or paused)
    /// and wake the background loop. No-op for the polling strategy.
    pub(super) fn rearm(&self, state: &mut QueueState<C::Key>) {
        if self.arm_root(state) {
            self.wake.notify_one();
        }
    }

    /// Aim the timer without waking the loop; returns whether it was armed.
    pub(super) fn arm_root(&self, state: &mut QueueState<C::Key>) -> bool {
        if !self.config.strategy.is_adaptive() {
            return false;
        }
        let target = match state.list.peek() {
            Some(root) if !state.paused => Wakeup::At(root.due()),
            _ => Wakeup::Unbounded,
        };
        state.timer.arm(target);
        true
    }

    /// Current timer target.
    pub fn wakeup(&self) -> Wakeup<C::Key> {
        self.read_state().timer.target()
    }

    /// Due key the timer is armed for, `None` while unbounded.
    pub fn armed_deadline(&self) -> Option<C::Key> {
        self.wakeup().deadline()
    }

    /// Number of times the timer has been re-targeted.
    pub fn rearm_count(&self) -> u64 {
        self.read_state().timer.rearms()
    }

    // ── Background loop ──────────────────────────────────────

    /// Run the background loop until `cancel` fires.
    ///
    /// Cancellation stops new dispatches only; executions already in flight
    /// keep running. Await [`Scheduler::drain`] afterwards for a quiesced
    /// state.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(queue = %self.config.name, strategy = %self.config.strategy, "start run");
        match self.config.strategy {
            WakeupStrategy::Polling { .. } => {
                let interval = self
                    .config
                    .strategy
                    .poll_interval()
                    .unwrap_or_default()
                    .max(Duration::from_millis(1));
                self.run_polling(interval, &cancel).await;
            }
            WakeupStrategy::Adaptive => self.run_adaptive(&cancel).await,
        }
        info!(queue = %self.config.name, "end run");
    }

    pub(super) fn lap_interval(&self) -> Duration {
        self.config.lap_interval().max(Duration::from_millis(1))
    }

    // ── Introspection ────────────────────────────────────────

    pub fn delayed_pops(&self) -> u64 {
        self.delayed_pops.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let (paused, pending, armed) = {
            let state = self.read_state();
            (
                state.paused,
                state.list.len(),
                state.timer.target().deadline().map(|k| k.to_string()),
            )
        };
        SchedulerSnapshot {
            name: self.config.name.clone(),
            strategy: self.config.strategy.to_string(),
            paused,
            pending,
            in_flight: self.in_flight(),
            dispatched_total: self.act_stats.total(),
            dispatched_per_sec: self.act_stats.per_sec(),
            delayed_pops: self.delayed_pops(),
            armed,
        }
    }
}

impl<C: Clock> fmt::Display for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (paused, len) = {
            let state = self.read_state();
            (state.paused, state.list.len())
        };
        write!(
            f,
            "TaskQueue[{} {} {} {}]",
            self.config.name,
            if paused { "paused" } else { "running" },
            len,
            self.act_stats
        )
    }
}

/// Serializable point-in-time view of a scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub name: String,
    pub strategy: String,
    pub paused: bool,
    /// Tasks waiting in the queue.
    pub pending: usize,
    /// Tasks dispatched and still executing.
    pub in_flight: usize,
    pub dispatched_total: u64,
    pub dispatched_per_sec: f64,
    pub delayed_pops: u64,
    /// Armed deadline of the adaptive timer, if any.
    pub armed: Option<String>,
}
