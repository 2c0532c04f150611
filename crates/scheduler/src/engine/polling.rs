use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use timedtask_core::Clock;

use super::core::Scheduler;

impl<C: Clock> Scheduler<C> {
    /// Fixed-interval loop: every wakeup dispatches whatever is due and
    /// sleeps until the next interval boundary or the next due key,
    /// whichever is earlier.
    pub(super) async fn run_polling(&self, interval: Duration, cancel: &CancellationToken) {
        let mut lap = tokio::time::interval(self.lap_interval());
        lap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let sleep = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = lap.tick() => self.act_stats.update_lap(),
                _ = &mut sleep => {
                    let wait = self.poll_once(interval);
                    trace!(
                        queue = %self.config.name,
                        wait_ms = wait.as_millis() as u64,
                        "next poll"
                    );
                    sleep.as_mut().reset(Instant::now() + wait);
                }
            }
        }
    }

    /// One poll. Returns how long to sleep before the next one.
    pub(super) fn poll_once(&self, interval: Duration) -> Duration {
        let started = self.clock.now();
        let scan = self.dispatch_due(started);
        if scan.paused {
            return interval;
        }
        next_poll_wait(
            self.clock.as_ref(),
            interval,
            started,
            self.clock.now(),
            scan.next_due,
        )
    }
}

/// Sleep before the next poll: time left in the current interval, cut short
/// by the next due key. The result lies in `[0, interval]`; a poll that took
/// no time waits the full interval, and one that overran it re-polls at once.
pub(super) fn next_poll_wait<C: Clock>(
    clock: &C,
    interval: Duration,
    started: C::Key,
    now: C::Key,
    next_due: Option<C::Key>,
) -> Duration {
    let boundary = interval.saturating_sub(clock.span(started, now));
    let wait = match next_due {
        Some(due) => boundary.min(clock.span(now, due)),
        None => boundary,
    };
    wait.min(interval)
}
