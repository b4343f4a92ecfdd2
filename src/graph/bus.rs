//! Shared output destination.
//!
//! Sources are scheduled with an absolute start time, an optional offset
//! into their buffer (overrun compensation), and a private gain chain.
//! The bus can render the mix at any instant, which is how tests observe
//! crossfade behavior without a hardware device.

use crate::graph::GainHandle;
use parking_lot::Mutex;
use std::sync::Arc;

/// Decoded PCM audio, mono.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    /// Buffer duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Sample value at `offset` seconds into the buffer, zero past the end.
    pub fn sample_at(&self, offset: f64) -> f32 {
        if offset < 0.0 {
            return 0.0;
        }
        let idx = (offset * f64::from(self.sample_rate)) as usize;
        self.samples.get(idx).copied().unwrap_or(0.0)
    }
}

/// A buffer scheduled for playback through a gain chain.
pub struct ScheduledSource {
    pub audio: Arc<AudioData>,
    /// Clock time at which the buffer's first sample sounds.
    pub start_at: f64,
    /// Seconds skipped at the front of the buffer (overrun compensation).
    pub offset: f64,
    /// Gain chain applied multiplicatively, segment gain then master.
    pub gains: Vec<Arc<GainHandle>>,
}

impl ScheduledSource {
    fn end_at(&self) -> f64 {
        self.start_at + (self.audio.duration() - self.offset).max(0.0)
    }
}

/// Mix bus all loops feed into.
pub struct OutputBus {
    sources: Mutex<Vec<ScheduledSource>>,
}

impl OutputBus {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Schedule a source. Already-started sources keep playing to
    /// completion; there is no way to silence one except its gain chain.
    pub fn play(&self, source: ScheduledSource) {
        tracing::debug!(
            start_at = source.start_at,
            offset = source.offset,
            duration = source.audio.duration(),
            "scheduling source"
        );
        self.sources.lock().push(source);
    }

    /// Render the mix at clock time `t`.
    pub fn sample_at(&self, t: f64) -> f32 {
        let sources = self.sources.lock();
        sources
            .iter()
            .filter(|s| t >= s.start_at)
            .map(|s| {
                let raw = s.audio.sample_at(t - s.start_at + s.offset);
                s.gains.iter().fold(raw, |v, g| v * g.value_at(t))
            })
            .sum()
    }

    /// Number of sources currently scheduled or sounding at `t`.
    pub fn active_sources(&self, t: f64) -> usize {
        let sources = self.sources.lock();
        sources
            .iter()
            .filter(|s| t >= s.start_at && t < s.end_at())
            .count()
    }

    /// Total scheduled sources, including finished ones not yet pruned.
    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    /// Drop sources that finished before `t`.
    pub fn prune(&self, t: f64) {
        self.sources.lock().retain(|s| s.end_at() > t);
    }
}

impl Default for OutputBus {
    fn default() -> Self {
        Self::new()
    }
}
