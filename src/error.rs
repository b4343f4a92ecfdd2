//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No initialized input device was available.
    #[error("Audio input is not ready: {0}")]
    InputNotReady(String),

    /// Both physical recorders are locked by an active session.
    #[error("Recording attempted while another session holds the recorders")]
    RecorderBusy,

    /// Segment index outside the loop's slot range.
    #[error("Segment index {index} out of range (0-{count})")]
    SegmentIndex {
        /// Offending index.
        index: usize,
        /// Number of slots in the loop.
        count: usize,
    },

    /// Board slot index outside the board's capacity.
    #[error("Board slot {index} out of range (0-{capacity})")]
    BoardSlot {
        /// Offending slot.
        index: usize,
        /// Number of slots on the board.
        capacity: usize,
    },

    /// Capture error from the input device.
    #[error("Capture error: {0}")]
    Capture(String),

    /// Invalid time settings (non-positive tempo, beats, or bars).
    #[error("Invalid time settings: {0}")]
    InvalidTimeSettings(String),

    /// Failed to enumerate devices.
    #[error("Failed to enumerate audio devices")]
    DevicesError(#[from] cpal::DevicesError),

    /// Failed to get device config.
    #[error("Failed to get audio device config")]
    DeviceConfigError(#[from] cpal::DefaultStreamConfigError),

    /// Failed to build stream.
    #[error("Failed to build audio stream")]
    BuildStreamError(#[from] cpal::BuildStreamError),

    /// Failed to play stream.
    #[error("Failed to play audio stream")]
    PlayStreamError(#[from] cpal::PlayStreamError),

    /// Hound error.
    #[error("Hound error: {0}")]
    HoundError(#[from] hound::Error),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
