//! Session-facing loop wrapper.
//!
//! [`NetworkedLoop`] pairs a [`Loop`] with an identity and a spot on the
//! board, and mirrors its lifecycle out through a [`SessionApi`]. Every
//! outbound call is fire-and-forget: the audio engine never waits on the
//! session layer, and a loop without an API behaves identically to one
//! with.

use crate::config::{RecordOptions, TimeSettings};
use crate::error::Result;
use crate::player::{Loop, LoopCallbacks, LoopStatus};
use crate::recording::Segment;
use crate::system::EngineHandles;
use crate::transport::LoopProgress;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Where a loop sits on the shared board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopPosition {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

impl Default for LoopPosition {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            radius: 1.0,
        }
    }
}

/// Announces a new loop to the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub loop_id: Uuid,
    pub settings: TimeSettings,
    pub segment_count: usize,
    /// Transport timestamp the first segment's main content aligns to.
    pub start_at: f64,
    pub position: LoopPosition,
}

/// Carries one recorded segment's encoded audio to the session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SegmentMessage {
    pub loop_id: Uuid,
    pub index: usize,
    /// Mono WAV bytes.
    pub data: Vec<u8>,
    pub head: f64,
    pub length: f64,
}

impl std::fmt::Debug for SegmentMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentMessage")
            .field("loop_id", &self.loop_id)
            .field("index", &self.index)
            .field("head", &self.head)
            .field("length", &self.length)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Outbound boundary to the session layer.
///
/// Implementations must not block: these are called from scheduler
/// tasks and from user-facing control methods. Delivery failures are the
/// implementation's problem; nothing in the engine observes them.
pub trait SessionApi: Send + Sync {
    fn create(&self, message: CreateMessage);
    fn set_segment(&self, message: SegmentMessage);
    fn play(&self, loop_id: Uuid, start_at: f64);
    fn stop(&self, loop_id: Uuid);
    fn move_to(&self, loop_id: Uuid, position: LoopPosition);
    fn delete(&self, loop_id: Uuid);
}

/// A loop with a session identity.
pub struct NetworkedLoop {
    id: Uuid,
    inner: Arc<Loop>,
    api: Option<Arc<dyn SessionApi>>,
    position: Mutex<LoopPosition>,
}

impl std::fmt::Debug for NetworkedLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedLoop")
            .field("id", &self.id)
            .field("inner", &self.inner)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl NetworkedLoop {
    /// Schedule a recording session and announce the new loop to the
    /// session, forwarding each segment as it decodes.
    pub fn record(
        handles: &EngineHandles,
        opts: RecordOptions,
        start_immediately: bool,
        position: LoopPosition,
        api: Option<Arc<dyn SessionApi>>,
    ) -> Result<Arc<Self>> {
        let id = Uuid::new_v4();
        let settings = handles.transport.settings();

        let mut callbacks = LoopCallbacks::default();
        if let Some(api) = &api {
            let create_api = Arc::clone(api);
            callbacks.on_create = Some(Box::new(move |segment_count, start_at| {
                create_api.create(CreateMessage {
                    loop_id: id,
                    settings,
                    segment_count,
                    start_at,
                    position,
                });
            }));

            let segment_api = Arc::clone(api);
            callbacks.on_segment = Some(Arc::new(move |segment: &Segment| {
                segment_api.set_segment(SegmentMessage {
                    loop_id: id,
                    index: segment.index,
                    data: segment.data.clone(),
                    head: segment.head,
                    length: segment.length,
                });
            }));
        }

        let inner = Loop::record(handles, opts, start_immediately, callbacks)?;
        Ok(Arc::new(Self {
            id,
            inner,
            api,
            position: Mutex::new(position),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> LoopStatus {
        self.inner.status()
    }

    pub fn progress(&self) -> LoopProgress {
        self.inner.progress()
    }

    /// Normalized waveform preview of the assembled loop.
    pub fn preview(&self) -> Arc<Vec<f32>> {
        self.inner.buffer().preview()
    }

    pub fn position(&self) -> LoopPosition {
        *self.position.lock()
    }

    /// Start playback and broadcast the synchronized start timestamp.
    /// During recording this only arms autoplay; the play message goes
    /// out when the peer would actually hear something.
    pub fn start(&self) {
        if let Some(start_at) = self.inner.start() {
            if let Some(api) = &self.api {
                api.play(self.id, start_at);
            }
        }
    }

    pub fn stop(&self) {
        self.inner.stop();
        if let Some(api) = &self.api {
            api.stop(self.id);
        }
    }

    pub fn move_to(&self, position: LoopPosition) {
        *self.position.lock() = position;
        if let Some(api) = &self.api {
            api.move_to(self.id, position);
        }
    }

    /// Tear down: stop playback and tell the session the loop is gone.
    pub fn delete(&self) {
        self.inner.stop();
        if let Some(api) = &self.api {
            api.delete(self.id);
        }
    }
}
