use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::Utc;
use serde_json::Value;
use tracing::error;

use timedtask_core::{DueKey, TaskError};

use crate::stats::StatHandle;

/// Function run when a task becomes due. Receives the task itself so it can
/// read its argument and due key.
pub type TaskFn<K> = Arc<dyn Fn(&Task<K>) -> anyhow::Result<()> + Send + Sync>;

/// Heap position of a task that is not in any queue.
const NOT_ENQUEUED: usize = usize::MAX;

struct TaskFields<K: DueKey> {
    due: K,
    argument: Value,
    func: TaskFn<K>,
}

/// A unit of deferred work.
///
/// Tasks are shared as `Arc<Task<K>>`: the caller keeps a handle to update or
/// remove the task later, the queue holds one while it is pending, and the
/// execution slot holds one while it runs. The heap position is written only
/// by [`TaskList`](crate::TaskList).
pub struct Task<K: DueKey> {
    name: String,
    index: AtomicUsize,
    fields: RwLock<TaskFields<K>>,
}

impl<K: DueKey> Task<K> {
    /// Create a task. `name` groups execution statistics, so tasks running the
    /// same logical function should share it.
    pub fn new<F>(name: impl Into<String>, due: K, argument: Value, func: F) -> Arc<Self>
    where
        F: Fn(&Task<K>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_fn(name, due, argument, Arc::new(func))
    }

    /// Create a task from an already shared function.
    pub fn with_fn(name: impl Into<String>, due: K, argument: Value, func: TaskFn<K>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            index: AtomicUsize::new(NOT_ENQUEUED),
            fields: RwLock::new(TaskFields {
                due,
                argument,
                func,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn due(&self) -> K {
        self.fields().due
    }

    pub fn argument(&self) -> Value {
        self.fields().argument.clone()
    }

    pub fn func(&self) -> TaskFn<K> {
        Arc::clone(&self.fields().func)
    }

    /// Whether the task currently sits in a queue.
    pub fn is_enqueued(&self) -> bool {
        self.index.load(Ordering::Acquire) != NOT_ENQUEUED
    }

    pub(crate) fn heap_index(&self) -> Option<usize> {
        match self.index.load(Ordering::Acquire) {
            NOT_ENQUEUED => None,
            i => Some(i),
        }
    }

    /// Take ownership of the heap slot for a task that is not enqueued.
    /// Fails when another list already claimed it.
    pub(crate) fn claim_heap_index(&self, index: usize) -> bool {
        self.index
            .compare_exchange(NOT_ENQUEUED, index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_heap_index(&self, index: usize) {
        self.index.store(index, Ordering::Release);
    }

    pub(crate) fn clear_heap_index(&self) {
        self.index.store(NOT_ENQUEUED, Ordering::Release);
    }

    /// Overwrite argument, due key and function; returns the previous due key.
    pub(crate) fn replace(&self, argument: Value, due: K, func: TaskFn<K>) -> K {
        let mut fields = self.fields.write().unwrap_or_else(PoisonError::into_inner);
        let old = fields.due;
        fields.argument = argument;
        fields.due = due;
        fields.func = func;
        old
    }

    fn fields(&self) -> RwLockReadGuard<'_, TaskFields<K>> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verbose description used in panic reports.
    pub fn panic_report(&self) -> String {
        let fields = self.fields();
        format!(
            "Task[name: {}, due: {:?}, argument: {}, index: {:?}]",
            self.name,
            fields.due,
            fields.argument,
            self.heap_index()
        )
    }

    /// Run the task function inside a panic boundary.
    ///
    /// The stat handle is committed in every outcome and marked successful
    /// only when the function returns `Ok`. A panic is reported to stderr
    /// with the task's argument and a backtrace, then returned as
    /// [`TaskError::Panicked`].
    pub fn execute(&self, stat: StatHandle) -> Result<(), TaskError> {
        let func = self.func();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(self)));
        stat.commit();

        match outcome {
            Ok(Ok(())) => {
                stat.success();
                Ok(())
            }
            Ok(Err(source)) => Err(TaskError::Failed {
                task: self.to_string(),
                source,
            }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.report_panic(&message);
                Err(TaskError::Panicked {
                    task: self.to_string(),
                    message,
                })
            }
        }
    }

    fn report_panic(&self, message: &str) {
        let report = format!(
            "RecoverPanic {}\n\n{}\n\n{}\n\n{}\n",
            Utc::now(),
            self.panic_report(),
            message,
            Backtrace::force_capture()
        );
        let _ = std::io::stderr().write_all(report.as_bytes());
        error!(task = %self, panic = %message, "task panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<K: DueKey> fmt::Display for Task<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task[{} at {}]", self.name, self.due())
    }
}

impl<K: DueKey> fmt::Debug for Task<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields();
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("due", &fields.due)
            .field("argument", &fields.argument)
            .field("index", &self.heap_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use serde_json::json;
    use timedtask_core::GameTick;

    use super::*;
    use crate::stats::TaskStats;

    #[test]
    fn new_task_is_not_enqueued() {
        let task = Task::new("noop", GameTick(5), json!(1), |_| Ok(()));
        assert!(!task.is_enqueued());
        assert_eq!(task.heap_index(), None);
        assert_eq!(task.name(), "noop");
        assert_eq!(task.due(), GameTick(5));
        assert_eq!(task.argument(), json!(1));
        assert_eq!(task.to_string(), "Task[noop at tick:5]");
    }

    #[test]
    fn function_sees_its_own_argument() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_fn = seen.clone();
        let task = Task::new("read-arg", GameTick(1), json!({"n": 42}), move |t| {
            let n = t.argument()["n"].as_u64().unwrap_or_default();
            seen_in_fn.store(n as u32, Ordering::SeqCst);
            Ok(())
        });

        let stats = TaskStats::new();
        task.execute(stats.open(task.name())).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);

        let row = stats.get("read-arg").unwrap();
        assert_eq!(row.start_count, 1);
        assert_eq!(row.end_count, 1);
        assert_eq!(row.success_count, 1);
    }

    #[test]
    fn returned_error_commits_without_success() {
        let task = Task::new("fails", GameTick(1), Value::Null, |_| anyhow::bail!("no luck"));
        let stats = TaskStats::new();

        let err = task.execute(stats.open(task.name())).unwrap_err();
        assert!(matches!(err, TaskError::Failed { .. }));
        assert!(err.to_string().contains("no luck"));

        let row = stats.get("fails").unwrap();
        assert_eq!(row.end_count, 1);
        assert_eq!(row.success_count, 0);
        assert_eq!(row.fail_count, 1);
    }

    #[test]
    fn panic_is_intercepted_and_committed() {
        let task = Task::new("explodes", GameTick(1), json!("payload"), |_| {
            panic!("kaboom");
        });
        let stats = TaskStats::new();

        let err = task.execute(stats.open(task.name())).unwrap_err();
        match err {
            TaskError::Panicked { task, message } => {
                assert_eq!(task, "Task[explodes at tick:1]");
                assert_eq!(message, "kaboom");
            }
            other => panic!("expected panic error, got {other:?}"),
        }

        let row = stats.get("explodes").unwrap();
        assert_eq!(row.end_count, 1);
        assert_eq!(row.success_count, 0);
        assert_eq!(row.running_count, 0);
    }

    #[test]
    fn panic_report_includes_argument() {
        let task = Task::new("report", GameTick(9), json!({"user": "kim"}), |_| Ok(()));
        let report = task.panic_report();
        assert!(report.contains("kim"));
        assert!(report.contains("report"));
    }

    #[test]
    fn replace_swaps_fields_and_returns_old_due() {
        let task = Task::new("swap", GameTick(10), json!(1), |_| Ok(()));
        let failing: TaskFn<GameTick> =
            Arc::new(|_: &Task<GameTick>| -> anyhow::Result<()> { anyhow::bail!("new fn") });
        let old = task.replace(json!(2), GameTick(3), failing);
        assert_eq!(old, GameTick(10));
        assert_eq!(task.due(), GameTick(3));
        assert_eq!(task.argument(), json!(2));

        let stats = TaskStats::new();
        assert!(task.execute(stats.open(task.name())).is_err());
    }
}
