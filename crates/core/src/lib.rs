pub mod clock;
pub mod config;
pub mod error;

pub use clock::{
    Clock, DueKey, GameTick, ManualTicks, MonotonicTicks, TickClock, TickSource, WallClock,
};
pub use config::{SchedulerConfig, WakeupStrategy};
pub use error::*;
