//! Gapless playback compositor
//!
//! Speech arrives as many small segments. Playing each one as its own
//! source leaves audible gaps and clicks at the seams, so queued segments
//! are resampled and spliced into one continuous buffer with a short linear
//! crossfade at every internal boundary.

use std::collections::VecDeque;
use std::time::Duration;

use super::wav::{downmix, pcm16_to_f32, strip_wav_header};
use crate::config::PlaybackConfig;
use crate::{Error, Result};

/// One inbound speech segment, stripped of its container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pcm: Vec<u8>,
    sample_rate: u32,
    channels: u16,
}

impl AudioSegment {
    /// Build a segment from raw 16-bit PCM
    #[must_use]
    pub const fn from_pcm(pcm: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            pcm,
            sample_rate,
            channels,
        }
    }

    /// Build a segment from a WAV file (or raw PCM) as delivered by the agent
    ///
    /// `default_rate` applies when the buffer carries no `fmt ` chunk.
    ///
    /// # Errors
    ///
    /// Returns error if the container is malformed or holds no samples
    pub fn from_wav(bytes: &[u8], default_rate: u32) -> Result<Self> {
        let pcm = strip_wav_header(bytes)?;
        if pcm.data.len() < 2 {
            return Err(Error::Wav("segment holds no samples".to_string()));
        }

        let sample_rate = pcm.sample_rate.unwrap_or(default_rate);
        if sample_rate == 0 {
            return Err(Error::Wav("segment declares a zero sample rate".to_string()));
        }

        Ok(Self {
            pcm: pcm.data.to_vec(),
            sample_rate,
            channels: pcm.channels.unwrap_or(1).max(1),
        })
    }

    /// Source sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mono samples at the source rate
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        downmix(&pcm16_to_f32(&self.pcm), self.channels)
    }
}

/// The single buffer handed to the output device
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousBuffer {
    /// Mono samples at `sample_rate`
    pub samples: Vec<f32>,
    /// Output device rate
    pub sample_rate: u32,
    /// Number of segments merged into this buffer
    pub segments: usize,
}

impl ContinuousBuffer {
    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Number of output samples for `len` input samples
#[must_use]
pub fn resampled_len(len: usize, from: u32, to: u32) -> usize {
    if from == to || from == 0 {
        return len;
    }
    let (from, to) = (u64::from(from), u64::from(to));
    let out = (len as u64 * to + from / 2) / from;
    usize::try_from(out).unwrap_or(usize::MAX)
}

/// Resample by linear interpolation between neighbouring samples
#[must_use]
pub fn resample_linear(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || input.is_empty() || from == 0 || to == 0 {
        return input.to_vec();
    }

    let out_len = resampled_len(input.len(), from, to);
    let last = input.len() - 1;
    let step = f64::from(from) / f64::from(to);

    (0..out_len)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let pos = i as f64 * step;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = pos as usize;
            #[allow(clippy::cast_possible_truncation)]
            let frac = (pos - pos.floor()) as f32;
            let a = input[idx.min(last)];
            let b = input[(idx + 1).min(last)];
            (b - a).mul_add(frac, a)
        })
        .collect()
}

/// Splice segments into one buffer with a linear crossfade at each seam
///
/// The first segment is written as-is. Each later segment starts
/// `overlap` samples before the end of what has been written, where
/// `overlap` is `crossfade_len` clamped to both neighbours, and the overlap
/// region is blended as `existing * (1 - r) + new * r`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn splice(segments: &[Vec<f32>], crossfade_len: usize) -> Vec<f32> {
    let total: usize = segments.iter().map(Vec::len).sum();
    let mut out = vec![0.0f32; total];
    let mut written = 0usize;
    let mut prev_len = 0usize;

    for segment in segments.iter().filter(|s| !s.is_empty()) {
        let overlap = if written == 0 {
            0
        } else {
            crossfade_len.min(prev_len).min(segment.len())
        };
        let start = written - overlap;

        for (i, &sample) in segment[..overlap].iter().enumerate() {
            let r = i as f32 / overlap as f32;
            let existing = out[start + i];
            out[start + i] = existing.mul_add(1.0 - r, sample * r);
        }
        out[start + overlap..start + segment.len()].copy_from_slice(&segment[overlap..]);

        written = start + segment.len();
        prev_len = segment.len();
    }

    out.truncate(written);
    out
}

/// FIFO of pending segments that drains into continuous buffers
#[derive(Debug)]
pub struct GaplessEngine {
    queue: VecDeque<AudioSegment>,
    default_rate: u32,
    output_rate: u32,
    crossfade_len: usize,
}

impl GaplessEngine {
    /// Create an engine producing buffers at `output_rate`
    #[must_use]
    pub fn new(config: &PlaybackConfig, output_rate: u32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let crossfade_len = (config.crossfade.as_secs_f64() * f64::from(output_rate)).round() as usize;

        tracing::debug!(
            output_rate,
            crossfade_len,
            default_rate = config.source_sample_rate,
            "gapless engine initialized"
        );

        Self {
            queue: VecDeque::new(),
            default_rate: config.source_sample_rate,
            output_rate,
            crossfade_len,
        }
    }

    /// Parse an inbound WAV segment and append it to the queue
    ///
    /// # Errors
    ///
    /// Returns error if the segment is malformed; the queue is left untouched
    pub fn enqueue_wav(&mut self, bytes: &[u8]) -> Result<()> {
        let segment = AudioSegment::from_wav(bytes, self.default_rate)?;
        self.push(segment);
        Ok(())
    }

    /// Append a parsed segment
    pub fn push(&mut self, segment: AudioSegment) {
        self.queue.push_back(segment);
    }

    /// Number of segments waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every pending segment, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Crossfade length in output samples
    #[must_use]
    pub const fn crossfade_len(&self) -> usize {
        self.crossfade_len
    }

    /// Output device rate
    #[must_use]
    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Merge the whole queue into one continuous buffer
    ///
    /// Returns `None` when there is nothing to play.
    pub fn drain(&mut self) -> Option<ContinuousBuffer> {
        if self.queue.is_empty() {
            return None;
        }

        let rate = self.output_rate;
        let segments: Vec<Vec<f32>> = self
            .queue
            .drain(..)
            .map(|segment| resample_linear(&segment.samples(), segment.sample_rate, rate))
            .filter(|samples| !samples.is_empty())
            .collect();

        if segments.is_empty() {
            return None;
        }

        let buffer = ContinuousBuffer {
            samples: splice(&segments, self.crossfade_len),
            sample_rate: self.output_rate,
            segments: segments.len(),
        };

        tracing::trace!(
            segments = buffer.segments,
            samples = buffer.samples.len(),
            "built continuous buffer"
        );

        Some(buffer)
    }
}
