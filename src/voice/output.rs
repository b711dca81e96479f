//! Audio playback to speakers
//!
//! The compositor only needs one source at a time plus a shared gain stage,
//! so [`AudioOutput`] models exactly that.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::compositor::ContinuousBuffer;
use crate::{Error, Result};

/// Called once when a buffer plays to its natural end (never after `stop`)
pub type CompletionFn = Box<dyn FnOnce() + Send + 'static>;

/// A single-source output with a shared gain stage
pub trait AudioOutput: Send {
    /// Device sample rate that buffers must be rendered at
    fn sample_rate(&self) -> u32;

    /// Replace whatever is playing with `buffer`
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses the buffer
    fn play(&mut self, buffer: ContinuousBuffer, on_complete: CompletionFn) -> Result<()>;

    /// Current gain, or `None` when the output has no gain control
    fn gain(&self) -> Option<f32>;

    /// Linearly ramp gain from its current value to `target`
    fn ramp_gain(&mut self, target: f32, duration: Duration);

    /// Set gain immediately, cancelling any ramp
    fn set_gain(&mut self, value: f32);

    /// Stop the current source without firing its completion
    fn stop(&mut self);
}

struct Voice {
    samples: Vec<f32>,
    position: usize,
    on_complete: Option<CompletionFn>,
}

struct Ramp {
    from: f32,
    to: f32,
    total: usize,
    elapsed: usize,
}

/// State shared with the device callback
struct Mixer {
    voice: Option<Voice>,
    gain: f32,
    ramp: Option<Ramp>,
}

impl Default for Mixer {
    fn default() -> Self {
        Self {
            voice: None,
            gain: 1.0,
            ramp: None,
        }
    }
}

impl Mixer {
    /// Produce the next mono sample and advance the gain ramp
    fn next_sample(&mut self) -> f32 {
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.elapsed += 1;
            if ramp.elapsed >= ramp.total {
                self.gain = ramp.to;
                self.ramp = None;
            } else {
                #[allow(clippy::cast_precision_loss)]
                let t = ramp.elapsed as f32 / ramp.total as f32;
                self.gain = (ramp.to - ramp.from).mul_add(t, ramp.from);
            }
        }

        let Some(voice) = self.voice.as_mut() else {
            return 0.0;
        };

        if let Some(&sample) = voice.samples.get(voice.position) {
            voice.position += 1;
            return sample * self.gain;
        }

        if let Some(done) = self.voice.take().and_then(|mut v| v.on_complete.take()) {
            done();
        }
        0.0
    }
}

/// Plays buffers on the default output device
///
/// cpal streams are not `Send`, so the stream lives on its own thread and
/// only the mixer state is shared.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or the stream fails
    pub fn new() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_mixer = Arc::clone(&mixer);
        let thread = std::thread::Builder::new()
            .name("parley-playback".to_string())
            .spawn(move || {
                let stream = match build_stream(thread_mixer) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the output is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited".to_string()))??;

        Ok(Self {
            mixer,
            sample_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn with_mixer(&self, f: impl FnOnce(&mut Mixer)) {
        if let Ok(mut mixer) = self.mixer.lock() {
            f(&mut mixer);
        }
    }
}

fn build_stream(mixer: Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let config = supported.config();
    let channels = usize::from(config.channels);
    let sample_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut mixer) = mixer.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = mixer.next_sample();
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, sample_rate))
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&mut self, buffer: ContinuousBuffer, on_complete: CompletionFn) -> Result<()> {
        if buffer.sample_rate != self.sample_rate {
            return Err(Error::Playback(format!(
                "buffer rendered at {} Hz, device runs at {} Hz",
                buffer.sample_rate, self.sample_rate
            )));
        }

        let (samples, segments) = (buffer.samples.len(), buffer.segments);
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Playback("mixer lock poisoned".to_string()))?;
        mixer.voice = Some(Voice {
            samples: buffer.samples,
            position: 0,
            on_complete: Some(on_complete),
        });
        drop(mixer);

        tracing::debug!(samples, segments, "playback started");
        Ok(())
    }

    fn gain(&self) -> Option<f32> {
        self.mixer.lock().ok().map(|m| m.gain)
    }

    fn ramp_gain(&mut self, target: f32, duration: Duration) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = (duration.as_secs_f64() * f64::from(self.sample_rate)).round() as usize;
        self.with_mixer(|mixer| {
            if total == 0 {
                mixer.gain = target;
                mixer.ramp = None;
            } else {
                mixer.ramp = Some(Ramp {
                    from: mixer.gain,
                    to: target,
                    total,
                    elapsed: 0,
                });
            }
        });
    }

    fn set_gain(&mut self, value: f32) {
        self.with_mixer(|mixer| {
            mixer.gain = value;
            mixer.ramp = None;
        });
    }

    fn stop(&mut self) {
        self.with_mixer(|mixer| {
            if mixer.voice.take().is_some() {
                tracing::debug!("playback stopped");
            }
        });
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
