//! Deferred-task scheduler.
//!
//! Callers wrap a unit of work in a [`Task`] tagged with a due key (a
//! [`GameTick`] or a UTC timestamp) and push it into a [`Scheduler`]. The
//! scheduler keeps pending tasks in an index-tracked min-heap ([`TaskList`]),
//! wakes when the earliest task becomes due, and fans each due task out to
//! its own blocking execution slot. Per-function execution statistics are
//! collected in [`TaskStats`]; dispatch throughput in [`ActPerSec`].

pub mod engine;
pub mod rate;
pub mod stats;
pub mod task;
pub mod task_list;

pub use engine::{Scheduler, SchedulerSnapshot, Wakeup};
pub use rate::ActPerSec;
pub use stats::{StatHandle, StatSnapshot, TaskStats};
pub use task::{Task, TaskFn};
pub use task_list::TaskList;

pub use timedtask_core::{
    Clock, DueKey, GameTick, ManualTicks, MonotonicTicks, SchedulerConfig, TaskError, TickClock,
    TickSource, TimedTaskError, WakeupStrategy, WallClock,
};

/// Scheduler over the game-tick domain.
pub type GameTickScheduler = Scheduler<TickClock>;

/// Scheduler over the wall-clock domain.
pub type HumanTimeScheduler = Scheduler<WallClock>;
