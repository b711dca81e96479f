//! Barge-in handling
//!
//! Stopping a source mid-waveform clicks. The controller instead ramps the
//! shared gain down, stops the source once the ramp has settled, and then
//! restores unity gain for the next buffer.

use std::time::Duration;

use super::output::AudioOutput;
use crate::config::PlaybackConfig;

/// Gain the fade ramps towards
pub const FADE_FLOOR: f32 = 1e-4;

/// What the controller did to the live source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// Nothing was playing
    Idle,
    /// No gain stage; the source was stopped immediately
    HardStopped,
    /// Gain is ramping down; call [`InterruptionController::settle`] after the delay
    Fading { settle_after: Duration },
}

/// Fades out and stops the live source
#[derive(Debug, Clone, Copy)]
pub struct InterruptionController {
    fade_out: Duration,
    stop_delay: Duration,
}

impl InterruptionController {
    /// Create a controller with the configured fade timings
    #[must_use]
    pub const fn new(config: &PlaybackConfig) -> Self {
        Self {
            fade_out: config.fade_out,
            stop_delay: config.stop_delay,
        }
    }

    /// Time from interruption to hard stop
    #[must_use]
    pub fn fade_cycle(&self) -> Duration {
        self.fade_out + self.stop_delay
    }

    /// Begin interrupting the live source, if any
    pub fn begin(&self, output: &mut dyn AudioOutput, playing: bool) -> Interruption {
        if !playing {
            return Interruption::Idle;
        }

        match output.gain() {
            Some(current) => {
                tracing::debug!(
                    from = current,
                    fade_ms = self.fade_out.as_millis(),
                    "fading out interrupted playback"
                );
                output.ramp_gain(FADE_FLOOR, self.fade_out);
                Interruption::Fading {
                    settle_after: self.fade_cycle(),
                }
            }
            None => {
                tracing::debug!("no gain control, stopping playback immediately");
                output.stop();
                Interruption::HardStopped
            }
        }
    }

    /// Finish a fade: stop the source and restore unity gain
    pub fn settle(&self, output: &mut dyn AudioOutput) {
        output.stop();
        output.set_gain(1.0);
    }
}
