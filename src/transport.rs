//! Shared musical transport: the clock grid every loop aligns to.
//!
//! Loop boundaries are integer multiples of the loop length measured from
//! the transport's zero time. All math here is pure in the clock reading,
//! so callers can poll at UI rates with no side effects.

use crate::config::TimeSettings;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Position within the current loop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopProgress {
    /// Normalized position in `[0, 1)`.
    pub normalized: f64,
    /// Seconds into the current cycle.
    pub time: f64,
    /// Beats into the current cycle (fractional).
    pub beats: f64,
}

/// The shared transport clock.
///
/// Settings swap atomically and take effect on the next scheduling
/// recomputation; an in-flight schedule keeps the grid it was built on.
pub struct Transport {
    zero: f64,
    settings: ArcSwap<TimeSettings>,
}

impl Transport {
    /// Create a transport whose grid starts at clock time `zero`.
    pub fn new(zero: f64, settings: TimeSettings) -> Self {
        Self {
            zero,
            settings: ArcSwap::from_pointee(settings),
        }
    }

    /// Clock time of the transport's first boundary.
    pub fn zero(&self) -> f64 {
        self.zero
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> TimeSettings {
        **self.settings.load()
    }

    /// Replace the settings. Effective from the next computation.
    pub fn set_settings(&self, settings: TimeSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// Length of one loop cycle in seconds under the current settings.
    pub fn loop_length(&self) -> f64 {
        self.settings().loop_length()
    }

    /// Seconds from `now` until the next loop boundary that is at least
    /// `min_lead` seconds away.
    ///
    /// The returned instant is always on the loop grid, so callers get a
    /// boundary with enough lead to absorb scheduling imprecision.
    pub fn seconds_until_start(&self, now: f64, min_lead: f64) -> f64 {
        let loop_length = self.loop_length();
        let elapsed = now - self.zero;
        let until_start = loop_length - elapsed.rem_euclid(loop_length);
        if until_start < min_lead {
            until_start + loop_length
        } else {
            until_start
        }
    }

    /// Current position within the loop cycle.
    pub fn progress(&self, now: f64) -> LoopProgress {
        let time = self.settings();
        let delta = now - self.zero;
        let beats_since_start = delta * (time.bpm / 60.0);
        let beats_per_loop = time.beats_per_loop();
        let beats = beats_since_start.rem_euclid(beats_per_loop);
        LoopProgress {
            normalized: beats / beats_per_loop,
            time: beats / (time.bpm / 60.0),
            beats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn transport_90bpm() -> Transport {
        Transport::new(0.0, TimeSettings::new(90.0, 4, 1).unwrap())
    }

    #[test]
    fn test_loop_length_from_settings() {
        // 4 beats at 90bpm = 4 / 1.5 = 2.666..s
        assert_relative_eq!(transport_90bpm().loop_length(), 8.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_until_start_lands_on_grid() {
        let transport = transport_90bpm();
        let loop_length = transport.loop_length();

        for &now in &[0.1, 1.0, 2.5, 7.33, 100.01] {
            for &lead in &[0.0, 0.2, 1.0, 2.0] {
                let v = transport.seconds_until_start(now, lead);
                assert!(v >= lead, "v={v} lead={lead}");
                assert!(v < lead + loop_length, "v={v} lead={lead}");

                // now + v is a whole number of loops past zero
                let cycles = (now + v - transport.zero()) / loop_length;
                assert_relative_eq!(cycles, cycles.round(), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_until_start_defers_when_too_close() {
        let transport = Transport::new(0.0, TimeSettings::new(120.0, 4, 1).unwrap());
        // loop is 2s; at t=1.9 the boundary is 0.1s away
        let v = transport.seconds_until_start(1.9, 0.0);
        assert_relative_eq!(v, 0.1, epsilon = 1e-9);

        // with a 0.5s minimum lead we skip to the following boundary
        let v = transport.seconds_until_start(1.9, 0.5);
        assert_relative_eq!(v, 2.1, epsilon = 1e-9);
    }

    #[test]
    fn test_progress_cycles_and_is_idempotent() {
        let transport = Transport::new(0.0, TimeSettings::new(120.0, 4, 1).unwrap());

        let p = transport.progress(0.5);
        assert_relative_eq!(p.normalized, 0.25, epsilon = 1e-9);
        assert_relative_eq!(p.time, 0.5, epsilon = 1e-9);
        assert_relative_eq!(p.beats, 1.0, epsilon = 1e-9);

        // one full cycle later, identical position
        let p2 = transport.progress(2.5);
        assert_relative_eq!(p2.normalized, p.normalized, epsilon = 1e-9);

        // repeated polls with no time advance are identical
        let again = transport.progress(0.5);
        assert_eq!(p, again);
    }

    #[test]
    fn test_settings_swap_effective_next_computation() {
        let transport = Transport::new(0.0, TimeSettings::new(120.0, 4, 1).unwrap());
        assert_relative_eq!(transport.loop_length(), 2.0, epsilon = 1e-9);

        transport.set_settings(TimeSettings::new(60.0, 4, 1).unwrap());
        assert_relative_eq!(transport.loop_length(), 4.0, epsilon = 1e-9);
    }
}
