//! Due-key domains and the clocks that drive them.
//!
//! A scheduler orders tasks by a [`DueKey`] and asks its [`Clock`] two
//! questions: what the current key is, and how much wall time lies between
//! two keys. Two domains are provided:
//!
//! - [`WallClock`]: keys are `DateTime<Utc>` timestamps.
//! - [`TickClock`]: keys are [`GameTick`] counts read from an external
//!   [`TickSource`], converted to wall durations through a fixed tick length.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling coordinate with a total order.
pub trait DueKey: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> DueKey for T where T: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// Time source for one scheduling domain.
pub trait Clock: Send + Sync + 'static {
    type Key: DueKey;

    /// Current position of the clock.
    fn now(&self) -> Self::Key;

    /// Wall duration from `from` until `to`; zero when `to` is not after `from`.
    fn span(&self, from: Self::Key, to: Self::Key) -> Duration;

    /// The key `by` after `base`, saturating at the end of the domain.
    fn after(&self, base: Self::Key, by: Duration) -> Self::Key;

    /// The key `by` from now.
    fn deadline_in(&self, by: Duration) -> Self::Key {
        self.after(self.now(), by)
    }
}

// ── Wall clock ───────────────────────────────────────────────

/// Timestamp domain backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    type Key = DateTime<Utc>;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn span(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
        to.signed_duration_since(from).to_std().unwrap_or(Duration::ZERO)
    }

    fn after(&self, base: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(by)
            .ok()
            .and_then(|delta| base.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ── Game ticks ───────────────────────────────────────────────

/// Integer tick count supplied by a global clock source.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GameTick(pub i64);

impl GameTick {
    pub const fn new(tick: i64) -> Self {
        Self(tick)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn saturating_add(self, ticks: i64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

impl fmt::Display for GameTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

impl Add<i64> for GameTick {
    type Output = GameTick;

    fn add(self, ticks: i64) -> GameTick {
        self.saturating_add(ticks)
    }
}

impl Sub for GameTick {
    type Output = i64;

    fn sub(self, rhs: GameTick) -> i64 {
        self.0.saturating_sub(rhs.0)
    }
}

/// External supplier of the current tick.
pub trait TickSource: Send + Sync + 'static {
    fn current_tick(&self) -> GameTick;
}

/// Ticks elapsed since creation, one tick per `tick_length`.
#[derive(Debug, Clone)]
pub struct MonotonicTicks {
    origin: Instant,
    tick_length: Duration,
}

impl MonotonicTicks {
    pub fn new(tick_length: Duration) -> Self {
        Self {
            origin: Instant::now(),
            tick_length: normalize_tick_length(tick_length),
        }
    }
}

impl TickSource for MonotonicTicks {
    fn current_tick(&self) -> GameTick {
        let elapsed = self.origin.elapsed().as_nanos() / self.tick_length.as_nanos();
        GameTick(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}

/// Externally driven tick counter.
///
/// A game loop advances it once per frame; tests use it to pin the clock.
#[derive(Debug, Default)]
pub struct ManualTicks {
    tick: AtomicI64,
}

impl ManualTicks {
    pub fn new(start: GameTick) -> Self {
        Self {
            tick: AtomicI64::new(start.0),
        }
    }

    pub fn set(&self, tick: GameTick) {
        self.tick.store(tick.0, Ordering::SeqCst);
    }

    /// Advance by `ticks` and return the new value.
    pub fn advance(&self, ticks: i64) -> GameTick {
        GameTick(self.tick.fetch_add(ticks, Ordering::SeqCst).saturating_add(ticks))
    }
}

impl TickSource for ManualTicks {
    fn current_tick(&self) -> GameTick {
        GameTick(self.tick.load(Ordering::SeqCst))
    }
}

/// Tick domain clock: reads ticks from a [`TickSource`] and converts tick
/// spans to wall durations with a fixed tick length.
#[derive(Clone)]
pub struct TickClock {
    source: Arc<dyn TickSource>,
    tick_length: Duration,
}

impl TickClock {
    pub fn new(source: Arc<dyn TickSource>, tick_length: Duration) -> Self {
        Self {
            source,
            tick_length: normalize_tick_length(tick_length),
        }
    }

    /// Clock over a fresh [`MonotonicTicks`] source.
    pub fn monotonic(tick_length: Duration) -> Self {
        Self::new(Arc::new(MonotonicTicks::new(tick_length)), tick_length)
    }

    /// Clock over a [`ManualTicks`] source starting at `start`.
    ///
    /// The returned handle drives the clock.
    pub fn manual(start: GameTick, tick_length: Duration) -> (Self, Arc<ManualTicks>) {
        let ticks = Arc::new(ManualTicks::new(start));
        (Self::new(ticks.clone(), tick_length), ticks)
    }

    pub fn tick_length(&self) -> Duration {
        self.tick_length
    }

    /// Number of whole ticks covering `duration`, rounded up.
    pub fn ticks_for(&self, duration: Duration) -> i64 {
        let len = self.tick_length.as_nanos();
        let ticks = duration.as_nanos().div_ceil(len);
        i64::try_from(ticks).unwrap_or(i64::MAX)
    }
}

impl fmt::Debug for TickClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickClock")
            .field("now", &self.source.current_tick())
            .field("tick_length", &self.tick_length)
            .finish()
    }
}

impl Clock for TickClock {
    type Key = GameTick;

    fn now(&self) -> GameTick {
        self.source.current_tick()
    }

    fn span(&self, from: GameTick, to: GameTick) -> Duration {
        let ticks = to - from;
        if ticks <= 0 {
            return Duration::ZERO;
        }
        let nanos = self.tick_length.as_nanos().saturating_mul(ticks as u128);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn after(&self, base: GameTick, by: Duration) -> GameTick {
        base.saturating_add(self.ticks_for(by))
    }
}

fn normalize_tick_length(tick_length: Duration) -> Duration {
    tick_length.max(Duration::from_nanos(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_tick_arithmetic() {
        let t = GameTick::new(10);
        assert_eq!(t + 5, GameTick(15));
        assert_eq!(GameTick(15) - t, 5);
        assert_eq!(t - GameTick(15), -5);
        assert_eq!(GameTick(i64::MAX) + 1, GameTick(i64::MAX));
        assert_eq!(t.to_string(), "tick:10");
    }

    #[test]
    fn manual_ticks_set_and_advance() {
        let ticks = ManualTicks::new(GameTick(3));
        assert_eq!(ticks.current_tick(), GameTick(3));
        assert_eq!(ticks.advance(4), GameTick(7));
        ticks.set(GameTick(100));
        assert_eq!(ticks.current_tick(), GameTick(100));
    }

    #[test]
    fn tick_clock_span_converts_ticks_to_wall_time() {
        let (clock, _ticks) = TickClock::manual(GameTick(0), Duration::from_millis(10));
        assert_eq!(clock.span(GameTick(0), GameTick(5)), Duration::from_millis(50));
        assert_eq!(clock.span(GameTick(5), GameTick(0)), Duration::ZERO);
        assert_eq!(clock.span(GameTick(5), GameTick(5)), Duration::ZERO);
    }

    #[test]
    fn tick_clock_after_rounds_up() {
        let (clock, ticks) = TickClock::manual(GameTick(100), Duration::from_millis(10));
        assert_eq!(clock.after(GameTick(0), Duration::from_millis(25)), GameTick(3));
        assert_eq!(clock.after(GameTick(0), Duration::from_millis(30)), GameTick(3));
        assert_eq!(clock.deadline_in(Duration::from_millis(100)), GameTick(110));
        ticks.advance(10);
        assert_eq!(clock.now(), GameTick(110));
    }

    #[test]
    fn zero_tick_length_is_normalized() {
        let (clock, _ticks) = TickClock::manual(GameTick(0), Duration::ZERO);
        assert_eq!(clock.tick_length(), Duration::from_nanos(1));
        assert_eq!(clock.span(GameTick(0), GameTick(3)), Duration::from_nanos(3));
    }

    #[test]
    fn monotonic_ticks_never_go_backwards() {
        let source = MonotonicTicks::new(Duration::from_micros(1));
        let a = source.current_tick();
        std::thread::sleep(Duration::from_millis(2));
        let b = source.current_tick();
        assert!(b > a, "expected {b} > {a}");
    }

    #[test]
    fn wall_clock_span_and_after() {
        let clock = WallClock;
        let base = clock.now();
        let later = clock.after(base, Duration::from_secs(10));
        assert_eq!(clock.span(base, later), Duration::from_secs(10));
        assert_eq!(clock.span(later, base), Duration::ZERO);
        assert_eq!(
            clock.after(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
