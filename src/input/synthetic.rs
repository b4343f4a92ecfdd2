//! Deterministic input for tests and headless operation.

use crate::clock::AudioClock;
use crate::error::{Error, Result};
use crate::graph::AudioData;
use crate::input::{CaptureTicket, InputSource, RecorderSlot};
use parking_lot::Mutex;
use std::sync::Arc;

/// An input that synthesizes a phase-continuous sine tone.
///
/// The tone's phase is a function of absolute clock time, so segments
/// captured back-to-back are sample-continuous across their boundary.
/// That is the property the alternation protocol must preserve, which
/// makes gaps observable in tests.
pub struct SyntheticInput {
    clock: Arc<dyn AudioClock>,
    sample_rate: u32,
    frequency: f64,
    /// Simulated device start latency: capture begins this long after
    /// the start command is issued.
    start_latency: f64,
    active: [Mutex<Option<f64>>; 2],
}

impl SyntheticInput {
    pub fn new(clock: Arc<dyn AudioClock>, sample_rate: u32) -> Self {
        Self {
            clock,
            sample_rate,
            frequency: 220.0,
            start_latency: 0.0,
            active: [Mutex::new(None), Mutex::new(None)],
        }
    }

    /// Simulate a device whose capture starts `latency` seconds after
    /// the start command.
    pub fn with_start_latency(mut self, latency: f64) -> Self {
        self.start_latency = latency;
        self
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }
}

impl InputSource for SyntheticInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn begin_capture(&self, slot: RecorderSlot) -> Result<CaptureTicket> {
        let mut active = self.active[slot.index()].lock();
        if active.is_some() {
            return Err(Error::Capture(format!(
                "slot {slot:?} is already capturing"
            )));
        }

        let started_at = self.clock.now() + self.start_latency;
        *active = Some(started_at);
        Ok(CaptureTicket { started_at })
    }

    fn end_capture(&self, slot: RecorderSlot) -> Result<AudioData> {
        let started_at = self.active[slot.index()]
            .lock()
            .take()
            .ok_or_else(|| Error::Capture(format!("slot {slot:?} was not capturing")))?;

        let duration = (self.clock.now() - started_at).max(0.0);
        let count = (duration * f64::from(self.sample_rate)) as usize;
        let samples = (0..count)
            .map(|i| {
                let t = started_at + i as f64 / f64::from(self.sample_rate);
                (2.0 * std::f64::consts::PI * self.frequency * t).sin() as f32
            })
            .collect();

        Ok(AudioData {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}
