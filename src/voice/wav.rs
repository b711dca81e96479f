//! WAV container handling
//!
//! Inbound speech arrives as one WAV file per message. The chunk layout is
//! not fixed (some encoders emit `LIST`/`fact` chunks before `data`), so the
//! RIFF chunk list is walked instead of assuming a 44-byte header.

use crate::{Error, Result};

/// Raw PCM located inside (or passed through from) an inbound buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSlice<'a> {
    /// Little-endian 16-bit PCM payload
    pub data: &'a [u8],
    /// Sample rate from the `fmt ` chunk, if one was present
    pub sample_rate: Option<u32>,
    /// Channel count from the `fmt ` chunk, if one was present
    pub channels: Option<u16>,
}

impl<'a> PcmSlice<'a> {
    const fn raw(data: &'a [u8]) -> Self {
        Self {
            data,
            sample_rate: None,
            channels: None,
        }
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Strip the WAV container and return the `data` payload
///
/// Buffers without `RIFF` magic are returned unchanged as raw PCM. A `data`
/// size that runs past the end of the buffer (streamed WAVs often write
/// `0xFFFFFFFF`) is clamped to the bytes actually present.
///
/// # Errors
///
/// Returns error if a RIFF buffer is not WAVE, uses a sample width other than
/// 16 bits, or has no `data` chunk
pub fn strip_wav_header(bytes: &[u8]) -> Result<PcmSlice<'_>> {
    if !bytes.starts_with(b"RIFF") {
        return Ok(PcmSlice::raw(bytes));
    }

    if bytes.get(8..12) != Some(b"WAVE".as_slice()) {
        return Err(Error::Wav("RIFF container is not WAVE".to_string()));
    }

    let mut sample_rate = None;
    let mut channels = None;
    let mut offset = 12usize;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4).unwrap_or(0) as usize;
        let body = offset + 8;

        match id {
            b"fmt " => {
                if let (Some(ch), Some(rate), Some(bits)) = (
                    read_u16(bytes, body + 2),
                    read_u32(bytes, body + 4),
                    read_u16(bytes, body + 14),
                ) {
                    if bits != 16 {
                        return Err(Error::Wav(format!("unsupported sample width: {bits} bits")));
                    }
                    channels = Some(ch);
                    sample_rate = Some(rate);
                }
            }
            b"data" => {
                let end = body.saturating_add(size).min(bytes.len());
                return Ok(PcmSlice {
                    data: &bytes[body..end],
                    sample_rate,
                    channels,
                });
            }
            _ => {}
        }

        // Chunks are word aligned
        offset = body.saturating_add(size).saturating_add(size & 1);
    }

    Err(Error::Wav("no data chunk".to_string()))
}

/// Convert little-endian 16-bit PCM to normalized f32
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Convert f32 samples in [-1.0, 1.0] to little-endian 16-bit PCM
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Average interleaved channels down to mono
#[must_use]
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Encode f32 samples as a 16-bit mono WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
