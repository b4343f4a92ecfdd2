//! Audio input: the pool of two physical capture endpoints a recording
//! session alternates between.
//!
//! The engine requires an input to be granted and initialized before any
//! loop is constructed; it never retries acquisition internally.

mod codec;
mod mic;
mod synthetic;

pub use codec::{decode_wav, encode_wav};
pub use mic::MicInput;
pub use synthetic::SyntheticInput;

use crate::error::Result;
use crate::graph::AudioData;

/// Which of the two physical recorders to drive.
///
/// One slot is always capturing while the other finalizes, which is what
/// makes multi-segment recordings gapless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderSlot {
    A,
    B,
}

impl RecorderSlot {
    /// The alternate slot.
    pub fn other(self) -> Self {
        match self {
            RecorderSlot::A => RecorderSlot::B,
            RecorderSlot::B => RecorderSlot::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            RecorderSlot::A => 0,
            RecorderSlot::B => 1,
        }
    }
}

/// Receipt for a capture in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureTicket {
    /// Device-reported instant at which capture actually began. Start
    /// commands have nondeterministic latency, so this is measured, not
    /// the instant the command was issued.
    pub started_at: f64,
}

/// A live input device exposing two independent capture endpoints.
pub trait InputSource: Send + Sync {
    /// Capture sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Begin capturing on `slot` immediately.
    ///
    /// Fails if the slot is already capturing.
    fn begin_capture(&self, slot: RecorderSlot) -> Result<CaptureTicket>;

    /// Stop capturing on `slot` and return everything captured since
    /// [`InputSource::begin_capture`].
    fn end_capture(&self, slot: RecorderSlot) -> Result<AudioData>;
}
