//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::compositor::resample_linear;
use super::wav::downmix;
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Opens exclusive microphone streams
pub trait CaptureDevice: Send + Sync {
    /// Acquire the microphone
    ///
    /// # Errors
    ///
    /// Returns error if permission is denied or no device is usable
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>>;
}

/// An open microphone; dropping it releases the device
pub trait CaptureStream: Send {
    /// Take the mono samples captured since the last call, at the configured rate
    fn take_samples(&mut self) -> Vec<f32>;
}

/// Captures from the default input device via cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalCapture;

impl CpalCapture {
    /// Create a capture device handle
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CaptureDevice for CpalCapture {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureStream>> {
        Ok(Box::new(CpalCaptureStream::open(config)?))
    }
}

/// Microphone stream owned by a dedicated thread
///
/// cpal streams are not `Send`; the thread holds the stream and the
/// callback appends into a shared buffer.
pub struct CpalCaptureStream {
    buffer: Arc<Mutex<Vec<f32>>>,
    device_rate: u32,
    device_channels: u16,
    target_rate: u32,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCaptureStream {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or started
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        if config.echo_cancellation || config.noise_suppression || config.auto_gain_control {
            tracing::debug!(
                echo_cancellation = config.echo_cancellation,
                noise_suppression = config.noise_suppression,
                auto_gain_control = config.auto_gain_control,
                "voice processing requested; relying on the platform input path"
            );
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<StreamConfig>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_buffer = Arc::clone(&buffer);
        let target_rate = config.sample_rate;
        let thread = std::thread::Builder::new()
            .name("parley-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(thread_buffer, target_rate) {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok(config));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let stream_config = ready_rx
            .recv()
            .map_err(|_| Error::Capture("capture thread exited".to_string()))??;

        Ok(Self {
            buffer,
            device_rate: stream_config.sample_rate.0,
            device_channels: stream_config.channels,
            target_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn build_stream(buffer: Arc<Mutex<Vec<f32>>>, target_rate: u32) -> Result<(cpal::Stream, StreamConfig)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Capture("no input device available".to_string()))?;

    // Prefer a native mono config at the target rate, else take the default
    // and convert in software
    let preferred = device
        .supported_input_configs()
        .map_err(|e| Error::Capture(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(target_rate)
                && c.max_sample_rate() >= SampleRate(target_rate)
        })
        .map(|c| c.with_sample_rate(SampleRate(target_rate)).config());

    let config = match preferred {
        Some(config) => config,
        None => device
            .default_input_config()
            .map_err(|e| Error::Capture(e.to_string()))?
            .config(),
    };

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        target_rate,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Capture(e.to_string()))?;

    stream.play().map_err(|e| Error::Capture(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok((stream, config))
}

impl CaptureStream for CpalCaptureStream {
    fn take_samples(&mut self) -> Vec<f32> {
        let raw = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        let mono = downmix(&raw, self.device_channels);
        resample_linear(&mono, self.device_rate, self.target_rate)
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
