//! Per-function execution statistics.
//!
//! Every execution opens a [`StatHandle`] under the task's name, commits it
//! when the function returns, and marks it successful on `Ok`. Latency is
//! tracked as a lifetime average plus a high/low envelope that resets every
//! ten seconds.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Length of the rolling high/low latency window.
const WINDOW: Duration = Duration::from_secs(10);

/// Low-water mark after a window reset, in milliseconds.
const LOW_MS_RESET: f64 = 100_000.0;

#[derive(Debug)]
struct Stat {
    start_count: u64,
    end_count: u64,
    success_count: u64,
    total: Duration,
    high_ms: f64,
    low_ms: f64,
    window_start: Instant,
}

impl Stat {
    fn new(now: Instant) -> Self {
        Self {
            start_count: 0,
            end_count: 0,
            success_count: 0,
            total: Duration::ZERO,
            high_ms: 0.0,
            low_ms: LOW_MS_RESET,
            window_start: now,
        }
    }

    fn record(&mut self, now: Instant, elapsed: Duration) {
        self.end_count += 1;
        self.total += elapsed;

        if now.saturating_duration_since(self.window_start) > WINDOW {
            self.window_start = now;
            self.high_ms = 0.0;
            self.low_ms = LOW_MS_RESET;
        }

        let ms = elapsed.as_secs_f64() * 1000.0;
        self.high_ms = self.high_ms.max(ms);
        self.low_ms = self.low_ms.min(ms);
    }

    fn avg_ms(&self) -> f64 {
        if self.end_count == 0 {
            0.0
        } else {
            self.total.as_secs_f64() * 1000.0 / self.end_count as f64
        }
    }

    fn snapshot(&self, name: &str) -> StatSnapshot {
        StatSnapshot {
            name: name.to_string(),
            start_count: self.start_count,
            end_count: self.end_count,
            success_count: self.success_count,
            fail_count: self.end_count.saturating_sub(self.success_count),
            running_count: self.start_count.saturating_sub(self.end_count),
            avg_ms: self.avg_ms(),
            high_ms: self.high_ms,
            low_ms: self.low_ms,
        }
    }
}

type SharedStat = Arc<Mutex<Stat>>;

fn lock(stat: &SharedStat) -> MutexGuard<'_, Stat> {
    stat.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One in-progress execution.
#[derive(Debug)]
pub struct StatHandle {
    started: Instant,
    stat: SharedStat,
}

impl StatHandle {
    /// Record the end of the execution with its elapsed time.
    pub fn commit(&self) {
        let now = Instant::now();
        lock(&self.stat).record(now, now.saturating_duration_since(self.started));
    }

    pub fn success(&self) {
        lock(&self.stat).success_count += 1;
    }
}

/// Serializable view of one function's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatSnapshot {
    pub name: String,
    pub start_count: u64,
    pub end_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    /// Executions started but not yet committed.
    pub running_count: u64,
    /// Lifetime average latency.
    pub avg_ms: f64,
    /// Highest latency in the current 10s window.
    pub high_ms: f64,
    /// Lowest latency in the current 10s window.
    pub low_ms: f64,
}

/// Thread-safe registry of execution statistics keyed by task name.
#[derive(Debug, Default)]
pub struct TaskStats {
    stats: RwLock<HashMap<String, SharedStat>>,
}

impl TaskStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an execution of the function called `name`.
    pub fn open(&self, name: &str) -> StatHandle {
        let stat = self.get_or_create(name);
        lock(&stat).start_count += 1;
        StatHandle {
            started: Instant::now(),
            stat,
        }
    }

    fn get_or_create(&self, name: &str) -> SharedStat {
        if let Some(stat) = self
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(stat);
        }
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            stats
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Stat::new(Instant::now())))),
        )
    }

    pub fn get(&self, name: &str) -> Option<StatSnapshot> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats.get(name).map(|stat| lock(stat).snapshot(name))
    }

    /// All rows, sorted by name.
    pub fn snapshot(&self) -> Vec<StatSnapshot> {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<_> = stats
            .iter()
            .map(|(name, stat)| lock(stat).snapshot(name))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    pub fn len(&self) -> usize {
        self.stats.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TaskStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n task time Cnt \n")?;
        for row in self.snapshot() {
            writeln!(
                f,
                " Avg ms : |{:13.6}| StartCount : |{:15}| EndCount : |{:15}| SuccessCount : |{:15}| failCount : |{:15}| High ms(10s) : |{:13.6}| Low ms(10s) : |{:13.6}| funcName : {}",
                row.avg_ms,
                row.start_count,
                row.end_count,
                row.success_count,
                row.fail_count,
                row.high_ms,
                row.low_ms,
                row.name
            )?;
        }
        writeln!(f)
    }
}
