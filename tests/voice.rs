//! Voice pipeline integration tests
//!
//! Exercise the compositor and player without audio hardware

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley::config::PlaybackConfig;
use parley::voice::compositor::{resampled_len, splice};
use parley::voice::wav::{f32_to_pcm16, pcm16_to_f32, samples_to_wav};
use parley::voice::{
    AudioSegment, GaplessEngine, MemoryOutput, Player, PlayerEvent, PlayerNotify, Transition,
    strip_wav_header,
};

mod common;

use common::{RATE, wav_segment};

/// Generate sine wave audio samples
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[test]
fn test_three_one_second_segments_make_one_buffer() {
    let mut engine = GaplessEngine::new(&PlaybackConfig::default(), RATE);
    for _ in 0..3 {
        engine.enqueue_wav(&wav_segment(Duration::from_secs(1))).unwrap();
    }

    let buffer = engine.drain().unwrap();
    assert_eq!(buffer.segments, 3);
    assert_eq!(buffer.samples.len(), 3 * 44_100 - 2 * 221);

    // Roughly 3 s minus two 5 ms overlaps
    let expected = Duration::from_millis(2990);
    let diff = buffer.duration().abs_diff(expected);
    assert!(diff < Duration::from_millis(1), "duration {:?}", buffer.duration());

    assert!(engine.is_empty());
    assert!(engine.drain().is_none());
}

#[test]
fn test_buffer_length_is_sum_minus_overlaps_after_resampling() {
    let mut engine = GaplessEngine::new(&PlaybackConfig::default(), 48_000);
    let lengths = [300_usize, 4410, 22_050, 100];
    for len in lengths {
        let samples = vec![0.1; len];
        engine.enqueue_wav(&samples_to_wav(&samples, 44_100).unwrap()).unwrap();
    }

    let resampled: Vec<usize> = lengths
        .iter()
        .map(|&len| resampled_len(len, 44_100, 48_000))
        .collect();
    let crossfade = engine.crossfade_len();
    let overlaps: usize = resampled
        .windows(2)
        .map(|pair| crossfade.min(pair[0]).min(pair[1]))
        .sum();

    let buffer = engine.drain().unwrap();
    assert_eq!(buffer.sample_rate, 48_000);
    assert_eq!(
        buffer.samples.len(),
        resampled.iter().sum::<usize>() - overlaps
    );
}

#[test]
fn test_crossfade_is_linear_across_the_boundary() {
    let a = vec![1.0_f32; 10];
    let b = vec![0.0_f32; 10];
    let out = splice(&[a, b], 4);

    assert_eq!(out.len(), 16);
    assert!(out[..6].iter().all(|s| (*s - 1.0).abs() < f32::EPSILON));
    let fade: Vec<f32> = out[6..10].to_vec();
    assert!((fade[0] - 1.0).abs() < 1e-6);
    assert!((fade[1] - 0.75).abs() < 1e-6);
    assert!((fade[2] - 0.5).abs() < 1e-6);
    assert!((fade[3] - 0.25).abs() < 1e-6);
    assert!(out[10..].iter().all(|s| s.abs() < f32::EPSILON));
}

#[test]
fn test_raw_pcm_passes_through() {
    let pcm = f32_to_pcm16(&generate_sine_samples(440.0, 0.01, 16_000));
    let slice = strip_wav_header(&pcm).unwrap();
    assert_eq!(slice.data, pcm.as_slice());
    assert_eq!(slice.sample_rate, None);

    let segment = AudioSegment::from_wav(&pcm, 44_100).unwrap();
    assert_eq!(segment.sample_rate(), 44_100);
}

#[test]
fn test_wav_fmt_rate_overrides_default() {
    let samples = generate_sine_samples(440.0, 0.1, 24_000);
    let wav = samples_to_wav(&samples, 24_000).unwrap();

    let segment = AudioSegment::from_wav(&wav, 44_100).unwrap();
    assert_eq!(segment.sample_rate(), 24_000);
    assert_eq!(segment.samples().len(), samples.len());
}

#[test]
fn test_wav_round_trip_preserves_signal() {
    let samples = generate_sine_samples(440.0, 0.05, 16_000);
    let wav = samples_to_wav(&samples, 16_000).unwrap();
    let decoded = pcm16_to_f32(strip_wav_header(&wav).unwrap().data);

    assert_eq!(decoded.len(), samples.len());
    let max_err = samples
        .iter()
        .zip(&decoded)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0_f32, f32::max);
    assert!(max_err < 1e-3);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_with_deep_queue_settles_within_fade_cycle() {
    let (output, probe) = MemoryOutput::new(RATE);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let notify: PlayerNotify = Arc::new(move |e| sink.lock().unwrap().push(e));
    let mut player = Player::new(&PlaybackConfig::default(), Box::new(output), notify);

    assert_eq!(
        player.push_segment(&wav_segment(Duration::from_secs(1))),
        Transition::Started
    );
    for _ in 0..20 {
        player.push_segment(&wav_segment(Duration::from_millis(200)));
    }

    assert_eq!(player.interrupt(), 20);
    assert_eq!(player.queued(), 0);

    tokio::time::sleep(Duration::from_millis(61)).await;
    let settled = events.lock().unwrap().pop().unwrap();
    assert_eq!(settled, PlayerEvent::FadeSettled(1));
    assert_eq!(player.handle(settled), Transition::Drained);
    assert!(!probe.is_playing());
    assert_eq!(probe.played().len(), 1);
}

#[test]
fn test_without_gain_control_interrupt_is_immediate() {
    let (output, probe) = MemoryOutput::without_gain_control(RATE);
    let notify: PlayerNotify = Arc::new(|_| {});
    let mut player = Player::new(&PlaybackConfig::default(), Box::new(output), notify);

    player.push_segment(&wav_segment(Duration::from_millis(500)));
    player.push_segment(&wav_segment(Duration::from_millis(500)));
    assert_eq!(player.interrupt(), 1);

    assert!(!probe.is_playing());
    assert!(!player.is_live());
    assert!(probe.ramps().is_empty());
}
