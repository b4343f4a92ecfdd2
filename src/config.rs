//! Time settings and engine tuning constants.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of samples in a loop's preview waveform.
pub const PREVIEW_SIZE: usize = 200;

/// Seconds of lead to absorb imprecise timer firing. Scheduled steps are
/// armed this far before their deadline; it never shifts the audible
/// start times themselves.
pub const SCHEDULING_LEAD: f64 = 0.05;

/// Audio-pipeline lookahead in seconds. Sources are started this far
/// early so the limiter can look ahead without clipping.
pub const LOOKAHEAD_DELAY: f64 = 0.005;

/// Seconds over which `stop()` ramps the master gain to silence.
pub const STOP_FADE: f64 = 0.05;

/// Default pre-roll captured before a segment's nominal start.
pub const DEFAULT_HEAD: f64 = 0.1;

/// Default capture continued past a segment's nominal end.
pub const DEFAULT_TAIL: f64 = 0.1;

/// Default compensation for built-in microphone start latency.
pub const DEFAULT_MIC_DELAY: f64 = 0.35;

/// Loops longer than this are split into four segments instead of two.
pub const FOUR_SEGMENT_THRESHOLD: f64 = 4.0;

/// Musical transport settings shared by every loop in a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSettings {
    /// Tempo in beats per minute.
    pub bpm: f64,
    /// Beats per bar.
    pub beats_per_bar: u32,
    /// Bars per loop.
    pub bars: u32,
}

impl TimeSettings {
    /// Create settings, validating that a loop under them has positive length.
    pub fn new(bpm: f64, beats_per_bar: u32, bars: u32) -> Result<Self> {
        let settings = Self {
            bpm,
            beats_per_bar,
            bars,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate that every field is positive.
    pub fn validate(&self) -> Result<()> {
        if self.bpm <= 0.0 || !self.bpm.is_finite() {
            return Err(Error::InvalidTimeSettings(format!("bpm = {}", self.bpm)));
        }
        if self.beats_per_bar == 0 {
            return Err(Error::InvalidTimeSettings("beats_per_bar = 0".into()));
        }
        if self.bars == 0 {
            return Err(Error::InvalidTimeSettings("bars = 0".into()));
        }
        Ok(())
    }

    /// Total beats in one loop cycle.
    pub fn beats_per_loop(&self) -> f64 {
        f64::from(self.beats_per_bar) * f64::from(self.bars)
    }

    /// Loop length in seconds.
    pub fn loop_length(&self) -> f64 {
        self.beats_per_loop() / (self.bpm / 60.0)
    }

    /// Number of segments a loop recorded under these settings is split into.
    pub fn segment_count(&self) -> usize {
        if self.loop_length() > FOUR_SEGMENT_THRESHOLD {
            4
        } else {
            2
        }
    }
}

impl Default for TimeSettings {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            beats_per_bar: 4,
            bars: 1,
        }
    }
}

/// Tunable recording parameters. All take effect on the next session or
/// scheduling recomputation; nothing hot-patches an in-flight schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordOptions {
    /// Requested pre-roll per segment, in seconds.
    pub head: f64,
    /// Capture continued past each segment's nominal end, in seconds.
    pub tail: f64,
    /// Known input start latency to compensate for, in seconds.
    pub mic_delay: f64,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            head: DEFAULT_HEAD,
            tail: DEFAULT_TAIL,
            mic_delay: DEFAULT_MIC_DELAY,
        }
    }
}
