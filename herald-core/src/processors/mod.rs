//! Long-running bus workers.
//!
//! - `ListenerChannel`: owns the wake-up lease, dispatches events to handlers
//! - `Watchdog`: reads listener status, sends restart commands, respawns a
//!   dead listener task
//! - `RetentionReaper`: deletes events past the retention horizon
//!
//! Each worker has a `run(self, shutdown_rx, ..)` loop and is spawned by
//! [`EventBus::start`](crate::bus::EventBus::start).

pub mod listener;
pub mod retention;
pub mod watchdog;

pub use listener::{ListenerChannel, ListenerSpawner, resolve_watermark};
pub use retention::RetentionReaper;
pub use watchdog::{Fault, Watchdog};
