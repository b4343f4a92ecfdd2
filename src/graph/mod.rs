//! Minimal playback graph: gain automation handles feeding a shared
//! output bus. Sources connect through a private gain chain, so several
//! loops mix on one destination without touching each other's schedules.

mod bus;
mod gain;

pub use bus::{AudioData, OutputBus, ScheduledSource};
pub use gain::GainHandle;
