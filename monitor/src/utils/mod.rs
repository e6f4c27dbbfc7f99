//! Utility modules for the Treeline monitor.
//!
//! # Modules
//!
//! - [`timer`]: Single-slot, id-guarded one-shot timers

pub mod timer;

pub use timer::{TimerId, TimerSlot};
