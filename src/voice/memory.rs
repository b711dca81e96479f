//! Deterministic in-memory audio backends
//!
//! [`MemoryOutput`] and [`MemoryCapture`] stand in for the speaker and the
//! microphone. Each comes with a probe that a test (or the CLI's offline mode)
//! keeps to drive and inspect the device.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::capture::{CaptureDevice, CaptureStream};
use super::compositor::ContinuousBuffer;
use super::output::{AudioOutput, CompletionFn};
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// A gain ramp the output was asked to perform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp {
    pub from: f32,
    pub to: f32,
    pub duration: Duration,
}

#[derive(Default)]
struct OutputState {
    gain: f32,
    played: Vec<ContinuousBuffer>,
    playing: Option<CompletionFn>,
    ramps: Vec<GainRamp>,
    stops: usize,
    reject_next: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Records everything sent to the "speaker"; buffers finish only when told to
pub struct MemoryOutput {
    state: Arc<Mutex<OutputState>>,
    sample_rate: u32,
    gain_control: bool,
}

/// Test-side handle onto a [`MemoryOutput`]
#[derive(Clone)]
pub struct MemoryOutputProbe {
    state: Arc<Mutex<OutputState>>,
}

impl MemoryOutput {
    /// Create an output at `sample_rate` with a gain stage
    #[must_use]
    pub fn new(sample_rate: u32) -> (Self, MemoryOutputProbe) {
        Self::build(sample_rate, true)
    }

    /// Create an output with no gain stage
    #[must_use]
    pub fn without_gain_control(sample_rate: u32) -> (Self, MemoryOutputProbe) {
        Self::build(sample_rate, false)
    }

    fn build(sample_rate: u32, gain_control: bool) -> (Self, MemoryOutputProbe) {
        let state = Arc::new(Mutex::new(OutputState {
            gain: 1.0,
            ..OutputState::default()
        }));
        let probe = MemoryOutputProbe {
            state: Arc::clone(&state),
        };
        (
            Self {
                state,
                sample_rate,
                gain_control,
            },
            probe,
        )
    }
}

impl AudioOutput for MemoryOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, buffer: ContinuousBuffer, on_complete: CompletionFn) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.reject_next.take() {
            return Err(Error::Playback(reason));
        }
        state.played.push(buffer);
        state.playing = Some(on_complete);
        Ok(())
    }

    fn gain(&self) -> Option<f32> {
        self.gain_control.then(|| lock(&self.state).gain)
    }

    fn ramp_gain(&mut self, target: f32, duration: Duration) {
        if !self.gain_control {
            return;
        }
        let mut state = lock(&self.state);
        let from = state.gain;
        state.ramps.push(GainRamp {
            from,
            to: target,
            duration,
        });
        state.gain = target;
    }

    fn set_gain(&mut self, value: f32) {
        if self.gain_control {
            lock(&self.state).gain = value;
        }
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        if state.playing.take().is_some() {
            state.stops += 1;
        }
    }
}

impl MemoryOutputProbe {
    /// Every buffer handed to the output, in order
    #[must_use]
    pub fn played(&self) -> Vec<ContinuousBuffer> {
        lock(&self.state).played.clone()
    }

    /// Check whether a source is currently playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing.is_some()
    }

    /// Finish the current source naturally; returns false if nothing played
    pub fn complete(&self) -> bool {
        let done = lock(&self.state).playing.take();
        done.map(|f| f()).is_some()
    }

    /// Gain ramps requested so far
    #[must_use]
    pub fn ramps(&self) -> Vec<GainRamp> {
        lock(&self.state).ramps.clone()
    }

    /// Current gain value
    #[must_use]
    pub fn gain(&self) -> f32 {
        lock(&self.state).gain
    }

    /// Number of hard stops of a live source
    #[must_use]
    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    /// Make the next `play` call fail
    pub fn reject_next(&self, reason: &str) {
        lock(&self.state).reject_next = Some(reason.to_string());
    }
}

#[derive(Default)]
struct MicState {
    pending: Vec<f32>,
    open_streams: usize,
    opens: usize,
    deny: Option<String>,
    last_config: Option<CaptureConfig>,
}

/// A microphone fed by the test through [`MemoryMicrophone`]
pub struct MemoryCapture {
    state: Arc<Mutex<MicState>>,
}

/// Test-side handle onto a [`MemoryCapture`]
#[derive(Clone)]
pub struct MemoryMicrophone {
    state: Arc<Mutex<MicState>>,
}

impl MemoryCapture {
    /// Create a capture device and its driving handle
    #[must_use]
    pub fn new() -> (Self, MemoryMicrophone) {
        let state = Arc::new(Mutex::new(MicState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MemoryMicrophone { state },
        )
    }
}

impl CaptureDevice for MemoryCapture {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.deny.clone() {
            return Err(Error::Capture(reason));
        }
        state.opens += 1;
        state.open_streams += 1;
        state.last_config = Some(config.clone());
        drop(state);

        Ok(Box::new(MemoryCaptureStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryCaptureStream {
    state: Arc<Mutex<MicState>>,
}

impl CaptureStream for MemoryCaptureStream {
    fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut lock(&self.state).pending)
    }
}

impl Drop for MemoryCaptureStream {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_streams = state.open_streams.saturating_sub(1);
        // Samples spoken into a released microphone are lost
        if state.open_streams == 0 {
            state.pending.clear();
        }
    }
}

impl MemoryMicrophone {
    /// Speak samples into the microphone
    pub fn speak(&self, samples: &[f32]) {
        lock(&self.state).pending.extend_from_slice(samples);
    }

    /// Check whether any stream holds the microphone
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.state).open_streams > 0
    }

    /// How many times the microphone was acquired
    #[must_use]
    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }

    /// Refuse future opens (permission denied)
    pub fn deny(&self, reason: &str) {
        lock(&self.state).deny = Some(reason.to_string());
    }

    /// Allow opens again
    pub fn allow(&self) {
        lock(&self.state).deny = None;
    }

    /// Config passed to the most recent open
    #[must_use]
    pub fn last_config(&self) -> Option<CaptureConfig> {
        lock(&self.state).last_config.clone()
    }
}
