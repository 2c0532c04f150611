use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use timedtask_core::Clock;

use super::core::Scheduler;

impl<C: Clock> Scheduler<C> {
    /// Single-shot timer loop. The sleep always targets the armed deadline;
    /// every rearm wakes the loop through `wake` so the sleep is re-aimed
    /// before it can fire late or early.
    pub(super) async fn run_adaptive(&self, cancel: &CancellationToken) {
        let mut lap = tokio::time::interval(self.lap_interval());
        lap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let first = {
            let mut state = self.write_state();
            self.arm_root(&mut state);
            state.timer.remaining(self.clock.as_ref())
        };
        let sleep = tokio::time::sleep(first);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = lap.tick() => self.act_stats.update_lap(),
                _ = self.wake.notified() => {
                    let wait = self.timer_remaining();
                    trace!(queue = %self.config.name, wait_ms = wait.as_millis() as u64, "rearmed");
                    sleep.as_mut().reset(Instant::now() + wait);
                }
                _ = &mut sleep => {
                    let wait = self.fire();
                    sleep.as_mut().reset(Instant::now() + wait);
                }
            }
        }
    }

    fn timer_remaining(&self) -> Duration {
        self.read_state().timer.remaining(self.clock.as_ref())
    }

    /// Timer expiry: dispatch everything due, re-aim at the new root and
    /// return the time until it.
    pub(super) fn fire(&self) -> Duration {
        let scan = self.dispatch_due(self.clock.now());
        let mut state = self.write_state();
        self.arm_root(&mut state);
        let wait = state.timer.remaining(self.clock.as_ref());
        trace!(
            queue = %self.config.name,
            dispatched = scan.dispatched,
            paused = scan.paused,
            wait_ms = wait.as_millis() as u64,
            "timer fired"
        );
        wait
    }
}
