//! Recording session event types.

use std::sync::Arc;

/// One recorded slice of a loop cycle. Immutable once produced;
/// ownership passes from the recording manager to the loop to its
/// playback buffer.
#[derive(Clone)]
pub struct Segment {
    /// Encoded audio (mono WAV bytes).
    pub data: Vec<u8>,
    /// Measured pre-roll: seconds of audio captured before the segment's
    /// nominal start. Corrected from the device-reported capture start,
    /// not the requested head.
    pub head: f64,
    /// Nominal length of the segment's main content in seconds.
    pub length: f64,
    /// Position in the loop, `0..segment_count`.
    pub index: usize,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("head", &self.head)
            .field("length", &self.length)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Events emitted over the life of one recording session.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// Capture has actually begun. `start_at` is the nominal transport
    /// boundary the first segment's main content aligns to.
    Started { start_at: f64 },
    /// A segment is ready, emitted in index order.
    Segment(Segment),
    /// All segments delivered; the session lock is released.
    Finished,
    /// The session died mid-flight; the lock is released and no further
    /// events follow.
    Failed { message: String },
}

/// Callback receiving session events, invoked from scheduler tasks.
pub type EventSink = Arc<dyn Fn(RecorderEvent) + Send + Sync>;
