//! Loop lifecycle: the state machine that hands a recording session off
//! to endless playback.

use crate::config::RecordOptions;
use crate::error::Result;
use crate::player::LoopBuffer;
use crate::recording::{EventSink, RecorderEvent, Segment};
use crate::system::EngineHandles;
use crate::transport::LoopProgress;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopStatus {
    /// Recording scheduled but capture has not begun.
    Pending = 0,
    /// Capture in progress.
    Recording = 1,
    /// Looping playback.
    Playing = 2,
    /// Idle; playback can be started.
    Stopped = 3,
}

impl From<u8> for LoopStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => LoopStatus::Pending,
            1 => LoopStatus::Recording,
            2 => LoopStatus::Playing,
            _ => LoopStatus::Stopped,
        }
    }
}

/// Hooks for the session boundary. The core works identically whether
/// or not they are present.
#[derive(Default)]
pub struct LoopCallbacks {
    /// Fired once when the recording session is scheduled, with the
    /// segment count and the nominal start timestamp.
    pub on_create: Option<Box<dyn FnOnce(usize, f64) + Send>>,
    /// Fired for each segment once its audio has decoded.
    pub on_segment: Option<Arc<dyn Fn(&Segment) + Send + Sync>>,
}

/// One recorded loop: owns a recording session's output and the buffer
/// that plays it forever.
///
/// Status transitions are driven only by recording events and explicit
/// `start()`/`stop()` calls:
/// `Pending -> Recording -> Playing | Stopped`, then `start`/`stop`
/// toggle between `Playing` and `Stopped`.
pub struct Loop {
    status: AtomicU8,
    start_immediately: AtomicBool,
    buffer: Arc<LoopBuffer>,
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Loop {
    /// Schedule a recording session on the next transport boundary and
    /// return the loop that will own it.
    ///
    /// Fails fast if the recorders are locked by another session; a
    /// rejected call has no side effects.
    pub fn record(
        handles: &EngineHandles,
        opts: RecordOptions,
        start_immediately: bool,
        callbacks: LoopCallbacks,
    ) -> Result<Arc<Self>> {
        let settings = handles.transport.settings();
        settings.validate()?;
        let segment_count = settings.segment_count();

        let buffer = LoopBuffer::new(
            Arc::clone(&handles.clock),
            Arc::clone(&handles.sched),
            Arc::clone(&handles.transport),
            Arc::clone(&handles.bus),
            segment_count,
        );

        let loop_ = Arc::new(Self {
            status: AtomicU8::new(LoopStatus::Pending as u8),
            start_immediately: AtomicBool::new(start_immediately),
            buffer,
        });

        let sink = Self::event_sink(&loop_, callbacks.on_segment);
        let start_at = handles
            .recording
            .record_loop(&handles.transport, segment_count, opts, sink)?;

        if let Some(on_create) = callbacks.on_create {
            on_create(segment_count, start_at);
        }

        Ok(loop_)
    }

    fn event_sink(this: &Arc<Self>, on_segment: Option<Arc<dyn Fn(&Segment) + Send + Sync>>) -> EventSink {
        let loop_ = Arc::clone(this);
        Arc::new(move |event| match event {
            RecorderEvent::Started { .. } => {
                loop_.set_status(LoopStatus::Recording);
                // Eager start: playback begins while segments are still
                // arriving; later decodes fill their slots live.
                if loop_.start_immediately.load(Ordering::Acquire) {
                    loop_.buffer.start();
                }
            }
            RecorderEvent::Segment(segment) => {
                let on_ready: Option<Box<dyn FnOnce() + Send>> =
                    on_segment.as_ref().map(|callback| {
                        let callback = Arc::clone(callback);
                        let broadcast = segment.clone();
                        Box::new(move || callback(&broadcast)) as Box<dyn FnOnce() + Send>
                    });
                if let Err(err) = loop_.buffer.add_segment(segment, on_ready) {
                    tracing::error!("dropping segment: {err}");
                }
            }
            RecorderEvent::Finished => {
                if loop_.start_immediately.load(Ordering::Acquire) {
                    loop_.set_status(LoopStatus::Playing);
                } else {
                    loop_.set_status(LoopStatus::Stopped);
                }
            }
            RecorderEvent::Failed { message } => {
                tracing::warn!("loop recording failed: {message}");
                // An eager start may have a chain playing silence.
                loop_.buffer.stop();
                loop_.set_status(LoopStatus::Stopped);
            }
        })
    }

    /// Current lifecycle state.
    pub fn status(&self) -> LoopStatus {
        LoopStatus::from(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: LoopStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// The playback buffer.
    pub fn buffer(&self) -> &Arc<LoopBuffer> {
        &self.buffer
    }

    /// Start playback.
    ///
    /// From `Stopped` this starts the buffer and returns the timestamp
    /// at which the loop's first segment will sound (broadcast to peers
    /// for a synchronized start). While recording is still in flight it
    /// only requests autoplay once the session completes.
    pub fn start(&self) -> Option<f64> {
        match self.status() {
            LoopStatus::Stopped => {
                let start_at = self.buffer.start();
                self.set_status(LoopStatus::Playing);
                Some(start_at)
            }
            LoopStatus::Pending | LoopStatus::Recording => {
                self.start_immediately.store(true, Ordering::Release);
                // Mid-recording the chain can start right away; slots
                // play silence until their segments decode. The play
                // timestamp is only broadcast once the loop is whole.
                if self.status() == LoopStatus::Recording {
                    self.buffer.start();
                }
                None
            }
            LoopStatus::Playing => None,
        }
    }

    /// Stop playback.
    ///
    /// An in-flight recording is never interrupted: before the session
    /// completes this suppresses autoplay, and also silences a chain the
    /// eager start may already be running. Without that the loop would
    /// keep sounding after it settles in `Stopped`.
    pub fn stop(&self) {
        match self.status() {
            LoopStatus::Pending | LoopStatus::Recording => {
                self.start_immediately.store(false, Ordering::Release);
                // An eager start may already have a chain running.
                self.buffer.stop();
            }
            LoopStatus::Playing | LoopStatus::Stopped => {
                self.buffer.stop();
                self.set_status(LoopStatus::Stopped);
            }
        }
    }

    /// Position within the loop cycle; safe to poll.
    pub fn progress(&self) -> LoopProgress {
        self.buffer.progress()
    }
}
