//! Interrupt sources that run beside the engine.

/// Periodic timer interrupt source.
pub mod timer;

pub use timer::IntervalTimer;
