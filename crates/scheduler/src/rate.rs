use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug)]
struct Lap {
    total: u64,
    lap_count: u64,
    lap_start: Instant,
    per_sec: f64,
}

/// Throughput counter: counts events and, once per lap, turns the lap's
/// count into an events-per-second figure.
#[derive(Debug)]
pub struct ActPerSec {
    inner: Mutex<Lap>,
}

impl ActPerSec {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lap {
                total: 0,
                lap_count: 0,
                lap_start: Instant::now(),
                per_sec: 0.0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inc(&self) {
        let mut lap = self.lock();
        lap.total += 1;
        lap.lap_count += 1;
    }

    /// Close the current lap and start a new one.
    pub fn update_lap(&self) {
        self.update_lap_at(Instant::now());
    }

    fn update_lap_at(&self, now: Instant) {
        let mut lap = self.lock();
        let secs = now.saturating_duration_since(lap.lap_start).as_secs_f64();
        if secs > 0.0 {
            lap.per_sec = lap.lap_count as f64 / secs;
        }
        lap.lap_count = 0;
        lap.lap_start = now;
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    /// Rate measured over the last completed lap.
    pub fn per_sec(&self) -> f64 {
        self.lock().per_sec
    }
}

impl Default for ActPerSec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActPerSec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lap = self.lock();
        write!(f, "ActPerSec[{} {:.2}/s]", lap.total, lap.per_sec)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn lap_rate() {
        let rate = ActPerSec::new();
        let start = rate.lock().lap_start;
        for _ in 0..10 {
            rate.inc();
        }
        rate.update_lap_at(start + Duration::from_secs(2));

        assert_eq!(rate.total(), 10);
        assert!((rate.per_sec() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_lap_drops_rate_to_zero() {
        let rate = ActPerSec::new();
        let start = rate.lock().lap_start;
        rate.inc();
        rate.update_lap_at(start + Duration::from_secs(1));
        assert!((rate.per_sec() - 1.0).abs() < 1e-9);

        rate.update_lap_at(start + Duration::from_secs(2));
        assert_eq!(rate.per_sec(), 0.0);
        assert_eq!(rate.total(), 1);
    }

    #[test]
    fn display() {
        let rate = ActPerSec::new();
        rate.inc();
        assert_eq!(rate.to_string(), "ActPerSec[1 0.00/s]");
    }
}
