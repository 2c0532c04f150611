//! Scheduler engine -- one queue, one background loop, two wakeup strategies.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructors, queue mutations and accessors
//! - `timer`: the re-targetable deadline used by the adaptive strategy
//! - `dispatch`: in-flight tracking, concurrent dispatch and synchronous flush
//! - `polling`: fixed-interval wakeup loop
//! - `adaptive`: single-shot timer loop that follows the heap root

mod adaptive;
mod core;
mod dispatch;
mod polling;
mod timer;

pub use self::core::{Scheduler, SchedulerSnapshot};
pub use self::timer::{Wakeup, UNARMED_WAIT};
