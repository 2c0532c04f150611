use std::time::Duration;

use timedtask_core::{Clock, DueKey};

/// Sleep used while nothing is armed: long enough to never fire in practice.
pub const UNARMED_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Target of the adaptive scheduler's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup<K> {
    /// No task to wait for (empty queue or paused).
    Unbounded,
    /// Fire when the clock reaches this key.
    At(K),
}

impl<K: DueKey> Wakeup<K> {
    pub fn deadline(&self) -> Option<K> {
        match self {
            Wakeup::Unbounded => None,
            Wakeup::At(key) => Some(*key),
        }
    }
}

/// Single re-targetable deadline. Every `arm` supersedes the previous target.
#[derive(Debug)]
pub(crate) struct DeadlineTimer<K> {
    target: Wakeup<K>,
    rearms: u64,
}

impl<K: DueKey> DeadlineTimer<K> {
    pub(crate) fn new() -> Self {
        Self {
            target: Wakeup::Unbounded,
            rearms: 0,
        }
    }

    pub(crate) fn arm(&mut self, target: Wakeup<K>) {
        self.target = target;
        self.rearms += 1;
    }

    pub(crate) fn target(&self) -> Wakeup<K> {
        self.target
    }

    pub(crate) fn rearms(&self) -> u64 {
        self.rearms
    }

    /// Wall time left until the target, measured on `clock`.
    pub(crate) fn remaining<C: Clock<Key = K>>(&self, clock: &C) -> Duration {
        match self.target {
            Wakeup::Unbounded => UNARMED_WAIT,
            Wakeup::At(key) => clock.span(clock.now(), key),
        }
    }
}
