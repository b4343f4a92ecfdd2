//! Crossfaded playback scheduler.
//!
//! Layout of one segment's capture relative to the loop grid:
//!
//! ```text
//! |-------|--------------------------------|------|
//! | head  | main content                   | tail |
//! |-------|--------------------------------|------|
//! ```
//!
//! Mains play back-to-back; heads and tails overlap the neighbors and
//! carry the crossfade. Each cycle the slot-0 start time is recomputed
//! from the transport rather than extrapolated, so floating-point error
//! cannot accumulate over an unbounded number of repetitions.

use crate::clock::AudioClock;
use crate::config::{DEFAULT_HEAD, LOOKAHEAD_DELAY, PREVIEW_SIZE, SCHEDULING_LEAD, STOP_FADE};
use crate::error::{Error, Result};
use crate::graph::{AudioData, GainHandle, OutputBus, ScheduledSource};
use crate::input::decode_wav;
use crate::recording::Segment;
use crate::sched::{Scheduler, TaskId};
use crate::transport::{LoopProgress, Transport};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct DecodedSegment {
    audio: Arc<AudioData>,
    head: f64,
}

/// Holds one loop's decoded segments and plays them forever.
///
/// Two gain handles alternate between outgoing and incoming segments;
/// both feed a master gain used for immediate stops. The buffer is
/// started and stopped repeatedly without being recreated.
pub struct LoopBuffer {
    clock: Arc<dyn AudioClock>,
    sched: Arc<Scheduler>,
    transport: Arc<Transport>,
    bus: Arc<OutputBus>,
    slots: Mutex<Vec<Option<DecodedSegment>>>,
    raw_preview: Mutex<Vec<f32>>,
    preview: ArcSwap<Vec<f32>>,
    gains: [Arc<GainHandle>; 2],
    master: Arc<GainHandle>,
    pending: Mutex<Option<TaskId>>,
    stopped: AtomicBool,
    /// Bumped by every `start()`; steps carry the epoch they were armed
    /// under, so a step from a superseded chain cannot arm a new link.
    epoch: AtomicU64,
    /// Scheduled tasks hold this weakly, so dropping the buffer retires
    /// its chain instead of keeping it alive through the queue.
    weak: Weak<LoopBuffer>,
}

impl LoopBuffer {
    pub fn new(
        clock: Arc<dyn AudioClock>,
        sched: Arc<Scheduler>,
        transport: Arc<Transport>,
        bus: Arc<OutputBus>,
        segment_count: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            clock,
            sched,
            transport,
            bus,
            slots: Mutex::new((0..segment_count).map(|_| None).collect()),
            raw_preview: Mutex::new(vec![0.0; PREVIEW_SIZE]),
            preview: ArcSwap::from_pointee(vec![0.0; PREVIEW_SIZE]),
            gains: [Arc::new(GainHandle::new(0.0)), Arc::new(GainHandle::new(0.0))],
            master: Arc::new(GainHandle::new(0.0)),
            pending: Mutex::new(None),
            stopped: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            weak: weak.clone(),
        })
    }

    /// Number of segment slots.
    pub fn segment_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// True once every slot holds decoded audio.
    pub fn is_complete(&self) -> bool {
        self.slots.lock().iter().all(Option::is_some)
    }

    /// Down-sampled waveform of the whole loop, normalized to `[0, 1]`
    /// once every segment has decoded. Read-only UI surface.
    pub fn preview(&self) -> Arc<Vec<f32>> {
        self.preview.load_full()
    }

    /// Accept a recorded segment and decode it off the hot path.
    ///
    /// Decoding runs as a scheduler task; when it completes the slot
    /// becomes playable and `on_ready` fires (the network layer uses it
    /// to broadcast the segment). A decode failure logs and leaves the
    /// slot silent; playback continues around it.
    pub fn add_segment(
        &self,
        segment: Segment,
        on_ready: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<()> {
        let count = self.segment_count();
        if segment.index >= count {
            return Err(Error::SegmentIndex {
                index: segment.index,
                count,
            });
        }

        let weak = self.weak.clone();
        self.sched.schedule_at(self.clock.now(), move |_| {
            let Some(buffer) = weak.upgrade() else {
                return;
            };
            match decode_wav(&segment.data) {
                Ok(audio) => {
                    buffer.store_decoded(&segment, audio);
                    if let Some(on_ready) = on_ready {
                        on_ready();
                    }
                }
                Err(err) => {
                    tracing::error!(index = segment.index, "failed to decode segment: {err}");
                }
            }
        });
        Ok(())
    }

    fn store_decoded(&self, segment: &Segment, audio: AudioData) {
        let audio = Arc::new(audio);
        let mut slots = self.slots.lock();
        let count = slots.len();

        self.write_preview_slice(segment, &audio, count);

        slots[segment.index] = Some(DecodedSegment {
            audio,
            head: segment.head,
        });
        tracing::debug!(index = segment.index, "segment decoded");

        if slots.iter().all(Option::is_some) {
            self.normalize_preview();
        }
    }

    /// Map the segment's main region (head excluded) proportionally into
    /// its slice of the preview array.
    fn write_preview_slice(&self, segment: &Segment, audio: &AudioData, count: usize) {
        let rate = f64::from(audio.sample_rate);
        let dest_size = PREVIEW_SIZE / count;
        let dest_start = dest_size * segment.index;
        let source_start = (rate * segment.head) as usize;
        let source_size = rate * segment.length;

        let mut raw = self.raw_preview.lock();
        for dest in 0..dest_size {
            let source = (dest as f64 * source_size / dest_size as f64) as usize + source_start;
            raw[dest_start + dest] = audio.samples.get(source).copied().unwrap_or(0.0);
        }
    }

    fn normalize_preview(&self) {
        let raw = self.raw_preview.lock();
        let min = raw.iter().fold(0.0f32, |m, &v| m.min(v));
        let max = raw.iter().fold(0.0f32, |m, &v| m.max(v));
        let span = max - min;
        if span <= f32::EPSILON {
            return;
        }
        let normalized: Vec<f32> = raw.iter().map(|&v| (v - min) / span).collect();
        self.preview.store(Arc::new(normalized));
    }

    /// Begin endless playback.
    ///
    /// Returns the clock time at which slot 0's main content will sound;
    /// callers broadcast it so other clients start in sync.
    pub fn start(&self) -> f64 {
        let now = self.clock.now();
        let first_head = self.slot_head(0);
        let until_first = self
            .transport
            .seconds_until_start(now, SCHEDULING_LEAD + LOOKAHEAD_DELAY);
        let first_start = now + until_first;
        let arm_at = (first_start - first_head - SCHEDULING_LEAD - LOOKAHEAD_DELAY).max(now);

        // Swap the chain in atomically: a step from a superseded chain
        // that is still in flight sees the bumped epoch and dies.
        let mut pending = self.pending.lock();
        if let Some(id) = pending.take() {
            self.sched.cancel(id);
        }
        self.stopped.store(false, Ordering::Release);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.schedule_step(&mut pending, arm_at, 0, first_start, 0, 1, epoch);
        drop(pending);

        tracing::debug!(first_start, "loop playback scheduled");
        first_start
    }

    /// Stop as fast as a click-free ramp allows.
    ///
    /// Cancels only the pending next step; a source already started
    /// plays out under the closed master gain. A later `start()` builds
    /// a wholly fresh schedule, so stop/start cycles never accumulate
    /// stale timers.
    pub fn stop(&self) {
        // The flag flips under the `pending` lock: a step either armed
        // its next link before this (and we cancel that id), or it takes
        // the lock after and sees the flag.
        let id = {
            let mut pending = self.pending.lock();
            self.stopped.store(true, Ordering::Release);
            pending.take()
        };
        if let Some(id) = id {
            self.sched.cancel(id);
        }

        let now = self.clock.now();
        self.master.set_value_at(now, 1.0);
        self.master.linear_ramp_to(now + STOP_FADE, 0.0);
    }

    /// Position within the loop cycle. Pure and idempotent; safe to poll
    /// at UI refresh rates.
    pub fn progress(&self) -> LoopProgress {
        self.transport.progress(self.clock.now())
    }

    /// Master gain value right now. Diagnostic surface for callers and
    /// tests; 0 when stopped, 1 while sounding.
    pub fn master_level(&self) -> f32 {
        self.master.value_at(self.clock.now())
    }

    fn slot_head(&self, index: usize) -> f64 {
        self.slots.lock()[index]
            .as_ref()
            .map(|s| s.head)
            .unwrap_or(DEFAULT_HEAD)
    }

    /// Arm one link and publish its id, with the caller holding the
    /// `pending` lock so `stop()` can never observe a scheduled link
    /// whose id is not yet cancellable.
    fn schedule_step(
        &self,
        pending: &mut Option<TaskId>,
        at: f64,
        index: usize,
        start_time: f64,
        cur: usize,
        prv: usize,
        epoch: u64,
    ) {
        let weak = self.weak.clone();
        let id = self.sched.schedule_at(at, move |now| {
            if let Some(buffer) = weak.upgrade() {
                buffer.step(now, index, start_time, cur, prv, epoch);
            }
        });
        *pending = Some(id);
    }

    /// One link of the self-rescheduling playback chain.
    ///
    /// `start_time` is when this slot's main content should sound,
    /// disregarding head and lookahead. The next link is always armed
    /// before this one's deadline passes.
    fn step(
        &self,
        now: f64,
        index: usize,
        start_time: f64,
        cur: usize,
        prv: usize,
        epoch: u64,
    ) {
        let count = self.segment_count();
        let segment_length = self.transport.loop_length() / count as f64;

        // Arm the next link first. Slot 0 re-anchors to the transport to
        // cancel accumulated floating-point drift; other slots
        // extrapolate from this one's start.
        let next_index = (index + 1) % count;
        let next_head = self.slot_head(next_index);
        let next_start = if next_index == 0 {
            let clock_now = self.clock.now();
            clock_now + self.transport.seconds_until_start(clock_now, 0.0)
        } else {
            start_time + segment_length
        };
        let arm_at = next_start - next_head - SCHEDULING_LEAD - LOOKAHEAD_DELAY;

        {
            // Checked under the `pending` lock: a stop() that beat this
            // step to the lock already flipped the flag, and a stale
            // epoch means a newer chain owns `pending`.
            let mut pending = self.pending.lock();
            if self.stopped.load(Ordering::Acquire)
                || epoch != self.epoch.load(Ordering::Acquire)
            {
                return;
            }
            self.schedule_step(&mut pending, arm_at, next_index, next_start, prv, cur, epoch);
        }

        // Fade this slot in over its head. If we are already late, start
        // mid-buffer by the overrun instead of starting late.
        let head = self.slot_head(index);
        let mut fade_in = start_time - head - LOOKAHEAD_DELAY;
        let mut offset = 0.0;
        if fade_in < now {
            offset = now - fade_in;
            fade_in = now;
        }

        // A stop() landing after the arm above has cancelled the next
        // link; do not undo its master ramp.
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let cur_gain = &self.gains[cur];
        let prv_gain = &self.gains[prv];
        if fade_in >= start_time {
            // severe overrun: snap instead of ramping
            prv_gain.set_value_at(fade_in, 0.0);
            cur_gain.set_value_at(fade_in, 1.0);
        } else {
            prv_gain.set_value_at(fade_in, 1.0);
            prv_gain.linear_ramp_to(start_time, 0.0);
            cur_gain.set_value_at(fade_in, 0.0);
            cur_gain.linear_ramp_to(start_time, 1.0);
        }

        // Master comes up regardless; this is what resumes after a stop.
        self.master.set_value_at(fade_in, 1.0);

        let audio = {
            let slots = self.slots.lock();
            slots[index].as_ref().map(|s| Arc::clone(&s.audio))
        };
        match audio {
            Some(audio) => {
                self.bus.play(ScheduledSource {
                    audio,
                    start_at: fade_in,
                    offset,
                    gains: vec![Arc::clone(cur_gain), Arc::clone(&self.master)],
                });
            }
            // The chain stays alive; this slot is silence until its
            // segment decodes.
            None => tracing::warn!(index, "segment slot empty at playback time"),
        }

        // Once per cycle, shed what playback no longer needs.
        if next_index == 0 {
            let horizon = now - self.transport.loop_length();
            self.bus.prune(horizon);
            for gain in &self.gains {
                gain.compact_before(horizon);
            }
            self.master.compact_before(horizon);
        }
    }
}
