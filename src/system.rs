//! Engine assembly and lifecycle.
//!
//! [`LooperSystem`] wires the clock, scheduler, transport, input, and
//! output bus together and owns the recording manager. Everything
//! downstream borrows the same [`EngineHandles`] bundle, so loops,
//! boards, and tests all see one consistent engine.

use crate::clock::{AudioClock, SystemClock};
use crate::config::{RecordOptions, TimeSettings};
use crate::error::Result;
use crate::graph::OutputBus;
use crate::input::{InputSource, MicInput};
use crate::player::{Loop, LoopBoard, LoopCallbacks, SessionApi};
use crate::recording::RecordingManager;
use crate::sched::{Scheduler, SchedulerDriver};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared engine pieces handed to loops and boards.
#[derive(Clone)]
pub struct EngineHandles {
    pub clock: Arc<dyn AudioClock>,
    pub sched: Arc<Scheduler>,
    pub bus: Arc<OutputBus>,
    pub transport: Arc<Transport>,
    pub recording: Arc<RecordingManager>,
}

/// Builder for [`LooperSystem`].
///
/// Production use takes the defaults: a monotonic system clock and the
/// default microphone. Tests inject a virtual clock and a synthetic
/// input instead.
pub struct LooperSystemBuilder {
    settings: TimeSettings,
    mic_delay: f64,
    clock: Option<Arc<dyn AudioClock>>,
    input: Option<Arc<dyn InputSource>>,
}

impl Default for LooperSystemBuilder {
    fn default() -> Self {
        Self {
            settings: TimeSettings::default(),
            mic_delay: crate::config::DEFAULT_MIC_DELAY,
            clock: None,
            input: None,
        }
    }
}

impl LooperSystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_settings(mut self, settings: TimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Input latency compensation in seconds.
    pub fn mic_delay(mut self, mic_delay: f64) -> Self {
        self.mic_delay = mic_delay;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn AudioClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn input(mut self, input: Arc<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    /// Assemble the engine. The transport's first boundary is pinned to
    /// the clock's current time.
    ///
    /// Fails if the settings are invalid or, when no input was injected,
    /// if the default microphone cannot be opened. Nothing retries a
    /// failed input; callers construct a new system instead.
    pub fn build(self) -> Result<LooperSystem> {
        self.settings.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn AudioClock>);
        let input = match self.input {
            Some(input) => input,
            None => Arc::new(MicInput::open(Arc::clone(&clock))?) as Arc<dyn InputSource>,
        };

        let sched = Arc::new(Scheduler::new());
        let bus = Arc::new(OutputBus::new());
        let transport = Arc::new(Transport::new(clock.now(), self.settings));
        let recording = Arc::new(RecordingManager::new(
            Arc::clone(&clock),
            Arc::clone(&sched),
            input,
        ));

        tracing::info!(
            bpm = self.settings.bpm,
            beats_per_bar = self.settings.beats_per_bar,
            bars = self.settings.bars,
            "looper system ready"
        );

        Ok(LooperSystem {
            handles: EngineHandles {
                clock,
                sched,
                bus,
                transport,
                recording,
            },
            record_opts: Mutex::new(RecordOptions {
                mic_delay: self.mic_delay,
                ..RecordOptions::default()
            }),
            driver: Mutex::new(None),
        })
    }
}

/// The assembled engine.
pub struct LooperSystem {
    handles: EngineHandles,
    record_opts: Mutex<RecordOptions>,
    driver: Mutex<Option<SchedulerDriver>>,
}

impl LooperSystem {
    pub fn builder() -> LooperSystemBuilder {
        LooperSystemBuilder::new()
    }

    pub fn handles(&self) -> &EngineHandles {
        &self.handles
    }

    pub fn clock(&self) -> &Arc<dyn AudioClock> {
        &self.handles.clock
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.handles.sched
    }

    pub fn bus(&self) -> &Arc<OutputBus> {
        &self.handles.bus
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.handles.transport
    }

    pub fn recording(&self) -> &Arc<RecordingManager> {
        &self.handles.recording
    }

    /// Run every task whose deadline has passed. Tests and embedders
    /// without a driver thread pump the engine with this.
    pub fn pump(&self) -> usize {
        self.handles.sched.run_due(self.handles.clock.now())
    }

    /// Start the background thread that pumps the scheduler. Idempotent;
    /// the thread stops when the system is dropped or on `shutdown()`.
    pub fn spawn_driver(&self) {
        let mut driver = self.driver.lock();
        if driver.is_none() {
            *driver = Some(
                Arc::clone(&self.handles.sched).spawn_driver(Arc::clone(&self.handles.clock)),
            );
        }
    }

    /// Stop the driver thread, if one is running.
    pub fn shutdown(&self) {
        self.driver.lock().take();
    }

    /// Replace the musical time settings. Existing loops keep their
    /// recorded audio; scheduling recomputations pick the new grid up.
    pub fn set_time_settings(&self, settings: TimeSettings) -> Result<()> {
        settings.validate()?;
        self.handles.transport.set_settings(settings);
        Ok(())
    }

    /// Adjust input latency compensation for future recordings.
    pub fn set_mic_delay(&self, mic_delay: f64) {
        self.record_opts.lock().mic_delay = mic_delay.max(0.0);
    }

    pub fn record_opts(&self) -> RecordOptions {
        *self.record_opts.lock()
    }

    /// Schedule a loop recording on the next transport boundary.
    pub fn record_loop(
        &self,
        start_immediately: bool,
        callbacks: LoopCallbacks,
    ) -> Result<Arc<Loop>> {
        Loop::record(&self.handles, self.record_opts(), start_immediately, callbacks)
    }

    /// A loop board backed by this engine.
    pub fn board(&self, api: Option<Arc<dyn SessionApi>>) -> LoopBoard {
        LoopBoard::new(self.handles.clone(), api)
    }
}
