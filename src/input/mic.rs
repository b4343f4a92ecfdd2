//! Hardware microphone input via cpal.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated
//! thread and hands samples to the engine over a lock-free SPSC ring.
//! Both capture slots read from the same rolling buffer of recent input,
//! so overlapping captures see identical audio where their windows
//! overlap.

use crate::clock::AudioClock;
use crate::error::{Error, Result};
use crate::graph::AudioData;
use crate::input::{CaptureTicket, InputSource, RecorderSlot};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Seconds of input kept in the rolling buffer. A capture must be ended
/// before its start scrolls out.
const RETENTION_SECONDS: f64 = 30.0;

struct MicState {
    /// Consumer side of the stream thread's ring.
    cons: HeapCons<f32>,
    /// Rolling buffer of recent mono samples.
    buffer: Vec<f32>,
    /// Absolute index of `buffer[0]` in the stream.
    base_index: u64,
    /// Absolute index of the next sample to arrive.
    total: u64,
    /// Clock time of absolute sample 0, fixed on first delivery.
    stream_zero: Option<f64>,
    /// Capture start index per slot.
    captures: [Option<u64>; 2],
}

/// Microphone-backed [`InputSource`].
pub struct MicInput {
    clock: Arc<dyn AudioClock>,
    sample_rate: u32,
    state: Mutex<MicState>,
    dropped: Arc<AtomicU32>,
    shutdown: Arc<AtomicBool>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
}

impl MicInput {
    /// Open the default input device and start streaming.
    ///
    /// This is the precondition the rest of the engine relies on: if it
    /// fails, no loop can be constructed, and nothing retries it.
    pub fn open(clock: Arc<dyn AudioClock>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::InputNotReady("no default input device".into()))?;
        let config = device.default_input_config()?;
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(Error::InputNotReady(format!(
                "unsupported input sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0;
        let channels = usize::from(config.channels().max(1));
        let (prod, cons) = HeapRb::<f32>::new(sample_rate as usize).split();
        let dropped = Arc::new(AtomicU32::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let stream_thread = spawn_stream_thread(
            device,
            config.into(),
            channels,
            prod,
            Arc::clone(&dropped),
            Arc::clone(&shutdown),
        )?;

        tracing::info!(sample_rate, "microphone input stream running");

        Ok(Self {
            clock,
            sample_rate,
            state: Mutex::new(MicState {
                cons,
                buffer: Vec::new(),
                base_index: 0,
                total: 0,
                stream_zero: None,
                captures: [None, None],
            }),
            dropped,
            shutdown,
            stream_thread: Some(stream_thread),
        })
    }

    /// Samples discarded because the engine drained too slowly.
    pub fn dropped_samples(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Pull everything the stream thread has delivered into the rolling
    /// buffer and trim it to the retention window.
    fn drain(&self, state: &mut MicState) {
        let mut received = 0u64;
        while let Some(sample) = state.cons.try_pop() {
            state.buffer.push(sample);
            received += 1;
        }
        state.total += received;

        if state.stream_zero.is_none() && state.total > 0 {
            state.stream_zero =
                Some(self.clock.now() - state.total as f64 / f64::from(self.sample_rate));
        }

        let retention = (RETENTION_SECONDS * f64::from(self.sample_rate)) as usize;
        if state.buffer.len() > retention {
            let cut = state.buffer.len() - retention;
            state.buffer.drain(..cut);
            state.base_index += cut as u64;
        }
    }

    fn index_time(&self, state: &MicState, index: u64) -> f64 {
        let zero = state.stream_zero.unwrap_or_else(|| self.clock.now());
        zero + index as f64 / f64::from(self.sample_rate)
    }
}

impl InputSource for MicInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn begin_capture(&self, slot: RecorderSlot) -> Result<CaptureTicket> {
        let mut state = self.state.lock();
        self.drain(&mut state);

        if state.captures[slot.index()].is_some() {
            return Err(Error::Capture(format!(
                "slot {slot:?} is already capturing"
            )));
        }

        let start_index = state.total;
        state.captures[slot.index()] = Some(start_index);
        let started_at = self.index_time(&state, start_index);
        Ok(CaptureTicket { started_at })
    }

    fn end_capture(&self, slot: RecorderSlot) -> Result<AudioData> {
        let mut state = self.state.lock();
        self.drain(&mut state);

        let start_index = state.captures[slot.index()]
            .take()
            .ok_or_else(|| Error::Capture(format!("slot {slot:?} was not capturing")))?;

        if start_index < state.base_index {
            return Err(Error::Capture(
                "capture window outlived the input retention buffer".into(),
            ));
        }

        let from = (start_index - state.base_index) as usize;
        let samples = state.buffer[from..].to_vec();
        Ok(AudioData {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

impl Drop for MicInput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_stream_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    channels: usize,
    mut prod: HeapProd<f32>,
    dropped: Arc<AtomicU32>,
    shutdown: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>> {
    // The stream must be built and kept alive on one thread; report the
    // build result back before returning.
    let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

    let handle = std::thread::Builder::new()
        .name("ostinato-mic".into())
        .spawn(move || {
            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(channels) {
                        if prod.try_push(frame[0]).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                |err| tracing::warn!("input stream error: {err}"),
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = ready_tx.send(Err(err.into()));
                    return;
                }
            };
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(err.into()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !shutdown.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(20));
            }
            drop(stream);
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(Error::InputNotReady("input stream thread died".into()))
        }
    }
}
