//! Dual-recorder alternation protocol.
//!
//! The input device's start command has unpredictable latency, and the
//! next segment's capture must already be running before the current one
//! ends. Two capture slots alternate: while one finalizes a segment the
//! other is already recording, so the emitted segments cover the loop
//! cycle with no silent gap.

use crate::clock::AudioClock;
use crate::config::{RecordOptions, SCHEDULING_LEAD};
use crate::error::{Error, Result};
use crate::input::{encode_wav, InputSource, RecorderSlot};
use crate::recording::{EventSink, RecorderEvent, Segment};
use crate::sched::Scheduler;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns the two capture slots and the session lock.
///
/// At most one recording session runs at a time; a second call fails
/// immediately with no partial action and no queueing.
pub struct RecordingManager {
    clock: Arc<dyn AudioClock>,
    sched: Arc<Scheduler>,
    input: Arc<dyn InputSource>,
    locked: Arc<AtomicBool>,
}

impl RecordingManager {
    pub fn new(
        clock: Arc<dyn AudioClock>,
        sched: Arc<Scheduler>,
        input: Arc<dyn InputSource>,
    ) -> Self {
        Self {
            clock,
            sched,
            input,
            locked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a session currently holds the recorders.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Record one loop cycle as `segment_count` segments, emitting
    /// events into `sink` as the session progresses.
    ///
    /// Returns the nominal start time: the transport boundary the first
    /// segment's main content aligns to, at least
    /// `head + scheduling lead + mic delay` in the future.
    pub fn record_loop(
        &self,
        transport: &Transport,
        segment_count: usize,
        opts: RecordOptions,
        sink: EventSink,
    ) -> Result<f64> {
        if segment_count == 0 {
            return Err(Error::Capture("segment_count must be positive".into()));
        }
        if self.locked.swap(true, Ordering::AcqRel) {
            return Err(Error::RecorderBusy);
        }

        let mic_delay = opts.mic_delay.max(0.0);
        let now = self.clock.now();
        let min_lead = opts.head + SCHEDULING_LEAD + mic_delay;
        let start_at = now + transport.seconds_until_start(now, min_lead);
        let segment_length = transport.loop_length() / segment_count as f64;

        tracing::info!(
            start_at,
            segment_count,
            segment_length,
            "recording session scheduled"
        );

        let session = Arc::new(Session {
            clock: Arc::clone(&self.clock),
            sched: Arc::clone(&self.sched),
            input: Arc::clone(&self.input),
            locked: Arc::clone(&self.locked),
            sink,
            opts: RecordOptions { mic_delay, ..opts },
            segment_length,
            total: segment_count,
            failed: AtomicBool::new(false),
        });

        let arm_at = (start_at - opts.head - SCHEDULING_LEAD - mic_delay).max(now);
        Session::schedule_arm(&session, arm_at, 0, RecorderSlot::A, start_at);

        Ok(start_at)
    }
}

/// Ephemeral state for one recording session. Created by `record_loop`,
/// dead once the last segment is emitted or on failure.
struct Session {
    clock: Arc<dyn AudioClock>,
    sched: Arc<Scheduler>,
    input: Arc<dyn InputSource>,
    locked: Arc<AtomicBool>,
    sink: EventSink,
    opts: RecordOptions,
    segment_length: f64,
    total: usize,
    failed: AtomicBool,
}

impl Session {
    fn schedule_arm(
        session: &Arc<Session>,
        at: f64,
        index: usize,
        slot: RecorderSlot,
        segment_start: f64,
    ) {
        let sess = Arc::clone(session);
        session.sched.schedule_at(at, move |_| {
            sess.arm(index, slot, segment_start);
        });
    }

    /// Start capturing segment `index` on `slot` and line up everything
    /// that follows: its own stop, and the alternate slot's arm for the
    /// next segment (before this one's window ends).
    fn arm(self: Arc<Self>, index: usize, slot: RecorderSlot, segment_start: f64) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }

        let ticket = match self.input.begin_capture(slot) {
            Ok(ticket) => ticket,
            Err(err) => return self.fail(index, err),
        };

        // Trust the device-reported start, not the requested one: the
        // emitted head is the pre-roll actually captured, less the known
        // input latency. All downstream alignment relies on this value.
        let actual_head = (segment_start - ticket.started_at - self.opts.mic_delay).max(0.0);

        if index == 0 {
            (self.sink)(RecorderEvent::Started {
                start_at: segment_start,
            });
        }

        tracing::debug!(index, ?slot, segment_start, actual_head, "armed recorder");

        let stop_at = segment_start + self.segment_length + self.opts.tail + self.opts.mic_delay;
        let sess = Arc::clone(&self);
        self.sched.schedule_at(stop_at, move |_| {
            sess.finish_segment(index, slot, actual_head);
        });

        if index + 1 < self.total {
            let next_start = segment_start + self.segment_length;
            let arm_at =
                (next_start - self.opts.head - SCHEDULING_LEAD - self.opts.mic_delay)
                    .max(self.clock.now());
            Self::schedule_arm(&self, arm_at, index + 1, slot.other(), next_start);
        }
    }

    /// Stop `slot`, encode what it captured, and emit the segment. The
    /// final segment releases the session lock and completes the stream.
    fn finish_segment(&self, index: usize, slot: RecorderSlot, head: f64) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }

        let audio = match self.input.end_capture(slot) {
            Ok(audio) => audio,
            Err(err) => return self.fail(index, err),
        };
        let data = match encode_wav(&audio) {
            Ok(data) => data,
            Err(err) => return self.fail(index, err),
        };

        (self.sink)(RecorderEvent::Segment(Segment {
            data,
            head,
            length: self.segment_length,
            index,
        }));

        if index + 1 == self.total {
            self.locked.store(false, Ordering::Release);
            tracing::info!(segments = self.total, "recording session complete");
            (self.sink)(RecorderEvent::Finished);
        }
    }

    fn fail(&self, index: usize, err: Error) {
        if self.failed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.locked.store(false, Ordering::Release);
        tracing::error!(index, "recording session failed: {err}");
        (self.sink)(RecorderEvent::Failed {
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::TimeSettings;
    use crate::input::{decode_wav, SyntheticInput};
    use parking_lot::Mutex;
    use approx::assert_relative_eq;

    struct Rig {
        clock: Arc<VirtualClock>,
        sched: Arc<Scheduler>,
        transport: Transport,
        manager: RecordingManager,
        events: Arc<Mutex<Vec<RecorderEvent>>>,
    }

    impl Rig {
        fn new(settings: TimeSettings, latency: f64) -> Self {
            let clock = Arc::new(VirtualClock::new());
            let sched = Arc::new(Scheduler::new());
            let input = Arc::new(
                SyntheticInput::new(clock.clone(), 8000).with_start_latency(latency),
            );
            let manager = RecordingManager::new(clock.clone(), sched.clone(), input);
            Rig {
                transport: Transport::new(0.0, settings),
                clock,
                sched,
                manager,
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn sink(&self) -> EventSink {
            let events = Arc::clone(&self.events);
            Arc::new(move |event| events.lock().push(event))
        }

        /// Step the virtual clock through every pending deadline.
        fn run_until(&self, t: f64) {
            while let Some(deadline) = self.sched.next_deadline() {
                if deadline > t {
                    break;
                }
                self.clock.set(deadline);
                self.sched.run_due(deadline);
            }
            self.clock.set(t);
        }
    }

    fn no_mic_delay() -> RecordOptions {
        RecordOptions {
            mic_delay: 0.0,
            ..RecordOptions::default()
        }
    }

    #[test]
    fn test_emits_segments_in_order_then_finishes() {
        let rig = Rig::new(TimeSettings::new(120.0, 4, 1).unwrap(), 0.02);
        let start = rig
            .manager
            .record_loop(&rig.transport, 2, no_mic_delay(), rig.sink())
            .unwrap();

        // 2s loop; first boundary with enough lead is t=2
        assert_relative_eq!(start, 2.0, epsilon = 1e-9);

        rig.run_until(10.0);
        let events = rig.events.lock();

        match &events[0] {
            RecorderEvent::Started { start_at } => assert_relative_eq!(*start_at, 2.0),
            other => panic!("expected Started, got {other:?}"),
        }
        let indices: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Segment(s) => Some(s.index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(matches!(events.last(), Some(RecorderEvent::Finished)));
        assert!(!rig.manager.is_locked());
    }

    #[test]
    fn test_segments_cover_cycle_gaplessly() {
        let rig = Rig::new(TimeSettings::new(120.0, 4, 1).unwrap(), 0.01);
        rig.manager
            .record_loop(&rig.transport, 2, no_mic_delay(), rig.sink())
            .unwrap();
        rig.run_until(10.0);

        let events = rig.events.lock();
        let segments: Vec<&Segment> = events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Segment(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(segments.len(), 2);

        for segment in &segments {
            assert_relative_eq!(segment.length, 1.0, epsilon = 1e-9);
            // head was corrected from the device-reported start, so the
            // captured audio spans head + length + tail
            let audio = decode_wav(&segment.data).unwrap();
            let captured = audio.samples.len() as f64 / 8000.0;
            assert!(
                captured >= segment.head + segment.length,
                "segment {} too short: {captured}",
                segment.index
            );
        }

        // arming runs a scheduling lead ahead of the requested head, and
        // device latency eats part of that margin
        assert_relative_eq!(segments[0].head, 0.15 - 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_second_session_rejected_while_locked() {
        let rig = Rig::new(TimeSettings::new(120.0, 4, 1).unwrap(), 0.0);
        rig.manager
            .record_loop(&rig.transport, 2, no_mic_delay(), rig.sink())
            .unwrap();

        let before = rig.events.lock().len();
        let second = rig.manager.record_loop(
            &rig.transport,
            2,
            no_mic_delay(),
            Arc::new(|_| panic!("rejected session must emit no events")),
        );
        assert!(matches!(second, Err(Error::RecorderBusy)));
        assert_eq!(rig.events.lock().len(), before);

        // after the first completes, the lock is free again
        rig.run_until(10.0);
        assert!(!rig.manager.is_locked());
        rig.manager
            .record_loop(&rig.transport, 2, no_mic_delay(), rig.sink())
            .unwrap();
    }

    #[test]
    fn test_mic_delay_arms_earlier() {
        let rig = Rig::new(TimeSettings::new(120.0, 4, 1).unwrap(), 0.0);
        let opts = RecordOptions {
            mic_delay: 0.35,
            ..RecordOptions::default()
        };
        let start = rig
            .manager
            .record_loop(&rig.transport, 2, opts, rig.sink())
            .unwrap();
        assert_relative_eq!(start, 2.0, epsilon = 1e-9);

        // first arm fires head + lead + mic delay before the boundary
        let first = rig.sched.next_deadline().unwrap();
        assert_relative_eq!(first, 2.0 - 0.1 - 0.05 - 0.35, epsilon = 1e-9);
    }

    /// Input whose capture windows can never be closed, standing in for
    /// a device that went away mid-session.
    struct DeadEndInput {
        inner: SyntheticInput,
    }

    impl crate::input::InputSource for DeadEndInput {
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn begin_capture(
            &self,
            slot: crate::input::RecorderSlot,
        ) -> crate::error::Result<crate::input::CaptureTicket> {
            self.inner.begin_capture(slot)
        }

        fn end_capture(
            &self,
            _slot: crate::input::RecorderSlot,
        ) -> crate::error::Result<crate::graph::AudioData> {
            Err(Error::Capture("input device went away".into()))
        }
    }

    #[test]
    fn test_device_failure_releases_lock_and_emits_failed() {
        let clock = Arc::new(VirtualClock::new());
        let sched = Arc::new(Scheduler::new());
        let input = Arc::new(DeadEndInput {
            inner: SyntheticInput::new(clock.clone(), 8000),
        });
        let manager = RecordingManager::new(clock.clone(), sched.clone(), input);
        let transport = Transport::new(0.0, TimeSettings::new(120.0, 4, 1).unwrap());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        manager
            .record_loop(
                &transport,
                2,
                no_mic_delay(),
                Arc::new(move |event| sink_events.lock().push(event)),
            )
            .unwrap();

        while let Some(deadline) = sched.next_deadline() {
            if deadline > 10.0 {
                break;
            }
            clock.set(deadline);
            sched.run_due(deadline);
        }

        // The first segment's stop hits the dead device: the session
        // fails once and goes quiet, even though the second capture's
        // stop deadline still fires afterwards.
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RecorderEvent::Started { .. }));
        match &events[1] {
            RecorderEvent::Failed { message } => {
                assert!(message.contains("went away"), "message: {message}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        // The lock died with the session; a new one can start.
        assert!(!manager.is_locked());
        manager
            .record_loop(&transport, 2, no_mic_delay(), Arc::new(|_| {}))
            .unwrap();
        assert!(manager.is_locked());
    }

    #[test]
    fn test_four_segment_session() {
        // 8s loop -> 4 segments of 2s
        let rig = Rig::new(TimeSettings::new(120.0, 4, 4).unwrap(), 0.0);
        rig.manager
            .record_loop(&rig.transport, 4, no_mic_delay(), rig.sink())
            .unwrap();
        rig.run_until(30.0);

        let events = rig.events.lock();
        let indices: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::Segment(s) => Some(s.index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
