//! Playback scheduling
//!
//! Ties the gapless engine, the output device and the interruption
//! controller together. At most one continuous buffer is live; segments that
//! arrive while it plays wait for its natural end (or for an interruption
//! fade to settle) and are then merged into the next buffer.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::compositor::GaplessEngine;
use super::interrupt::{Interruption, InterruptionController};
use super::output::AudioOutput;
use crate::config::PlaybackConfig;

/// Asynchronous playback notifications, tagged with the buffer id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Buffer played to its end
    Finished(u64),
    /// Interruption fade of this buffer has run its course
    FadeSettled(u64),
}

/// Delivers [`PlayerEvent`]s back to whoever owns the player
pub type PlayerNotify = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

/// Result of feeding the player an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing observable changed
    Unchanged,
    /// A new continuous buffer started playing
    Started,
    /// Playback ended and nothing is queued
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Live {
    Idle,
    Playing(u64),
    Fading(u64),
}

/// Schedules continuous buffers onto an [`AudioOutput`]
pub struct Player {
    engine: GaplessEngine,
    output: Box<dyn AudioOutput>,
    interrupts: InterruptionController,
    notify: PlayerNotify,
    live: Live,
    next_id: u64,
    fade_timer: Option<JoinHandle<()>>,
}

impl Player {
    /// Create a player rendering at the output's sample rate
    #[must_use]
    pub fn new(config: &PlaybackConfig, output: Box<dyn AudioOutput>, notify: PlayerNotify) -> Self {
        Self {
            engine: GaplessEngine::new(config, output.sample_rate()),
            output,
            interrupts: InterruptionController::new(config),
            notify,
            live: Live::Idle,
            next_id: 0,
            fade_timer: None,
        }
    }

    /// Check whether a buffer is live (playing or fading)
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live != Live::Idle
    }

    /// Number of segments waiting for the next buffer
    #[must_use]
    pub fn queued(&self) -> usize {
        self.engine.len()
    }

    /// Accept one inbound WAV segment
    ///
    /// Malformed segments are logged and dropped.
    pub fn push_segment(&mut self, wav: &[u8]) -> Transition {
        if let Err(e) = self.engine.enqueue_wav(wav) {
            tracing::warn!(error = %e, len = wav.len(), "dropping malformed audio segment");
            return Transition::Unchanged;
        }

        if self.live == Live::Idle && self.start_next() {
            return Transition::Started;
        }
        Transition::Unchanged
    }

    /// React to a completion or fade notification
    pub fn handle(&mut self, event: PlayerEvent) -> Transition {
        match (event, self.live) {
            (PlayerEvent::Finished(id), Live::Playing(live)) if id == live => {
                self.live = Live::Idle;
            }
            (PlayerEvent::Finished(id) | PlayerEvent::FadeSettled(id), Live::Fading(live))
                if id == live =>
            {
                if let Some(timer) = self.fade_timer.take() {
                    timer.abort();
                }
                self.interrupts.settle(self.output.as_mut());
                self.live = Live::Idle;
            }
            _ => {
                tracing::trace!(?event, "ignoring stale playback event");
                return Transition::Unchanged;
            }
        }

        if self.start_next() {
            Transition::Started
        } else {
            Transition::Drained
        }
    }

    /// Barge-in: drop everything queued and fade out the live buffer
    ///
    /// Returns the number of queued segments discarded.
    pub fn interrupt(&mut self) -> usize {
        let dropped = self.engine.clear();

        if let Live::Playing(id) = self.live {
            match self.interrupts.begin(self.output.as_mut(), true) {
                Interruption::Fading { settle_after } => {
                    self.live = Live::Fading(id);
                    let notify = Arc::clone(&self.notify);
                    self.fade_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(settle_after).await;
                        notify(PlayerEvent::FadeSettled(id));
                    }));
                }
                Interruption::HardStopped | Interruption::Idle => {
                    self.live = Live::Idle;
                }
            }
        }

        tracing::debug!(dropped, live = ?self.live, "playback interrupted");
        dropped
    }

    /// Stop everything immediately and forget the queue
    pub fn reset(&mut self) {
        if let Some(timer) = self.fade_timer.take() {
            timer.abort();
        }
        self.engine.clear();
        if self.live != Live::Idle {
            self.interrupts.settle(self.output.as_mut());
        }
        self.live = Live::Idle;
    }

    /// Drain the queue into a buffer and start it
    fn start_next(&mut self) -> bool {
        let Some(buffer) = self.engine.drain() else {
            return false;
        };

        self.next_id += 1;
        let id = self.next_id;
        let notify = Arc::clone(&self.notify);

        match self
            .output
            .play(buffer, Box::new(move || notify(PlayerEvent::Finished(id))))
        {
            Ok(()) => {
                self.live = Live::Playing(id);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start playback, dropping buffer");
                self.live = Live::Idle;
                false
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(timer) = self.fade_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::voice::memory::{MemoryOutput, MemoryOutputProbe};
    use crate::voice::wav::samples_to_wav;

    fn player() -> (Player, MemoryOutputProbe, Arc<Mutex<Vec<PlayerEvent>>>) {
        let (output, probe) = MemoryOutput::new(44_100);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let notify: PlayerNotify = Arc::new(move |e| sink.lock().unwrap().push(e));
        let player = Player::new(&PlaybackConfig::default(), Box::new(output), notify);
        (player, probe, events)
    }

    fn segment(ms: u32) -> Vec<u8> {
        samples_to_wav(&vec![0.2; (44_100 * ms / 1000) as usize], 44_100).unwrap()
    }

    #[test]
    fn first_segment_starts_immediately() {
        let (mut player, probe, _) = player();
        assert_eq!(player.push_segment(&segment(100)), Transition::Started);
        assert!(player.is_live());
        assert_eq!(probe.played().len(), 1);
    }

    #[test]
    fn arrivals_during_playback_merge_into_next_buffer() {
        let (mut player, probe, events) = player();
        player.push_segment(&segment(100));
        assert_eq!(player.push_segment(&segment(100)), Transition::Unchanged);
        assert_eq!(player.push_segment(&segment(100)), Transition::Unchanged);
        assert_eq!(player.queued(), 2);

        assert!(probe.complete());
        let finished = events.lock().unwrap().pop().unwrap();
        assert_eq!(player.handle(finished), Transition::Started);

        let played = probe.played();
        assert_eq!(played.len(), 2);
        assert_eq!(played[1].segments, 2);
        assert_eq!(played[1].samples.len(), 2 * 4410 - 221);

        assert!(probe.complete());
        let finished = events.lock().unwrap().pop().unwrap();
        assert_eq!(player.handle(finished), Transition::Drained);
        assert!(!player.is_live());
    }

    #[test]
    fn malformed_segment_does_not_wedge() {
        let (mut player, probe, _) = player();
        assert_eq!(player.push_segment(b"RIFF\0\0\0\0WAVE"), Transition::Unchanged);
        assert!(!player.is_live());
        assert_eq!(player.push_segment(&segment(50)), Transition::Started);
        assert_eq!(probe.played().len(), 1);
    }

    #[test]
    fn rejected_buffer_returns_to_idle() {
        let (mut player, probe, _) = player();
        probe.reject_next("device gone");
        assert_eq!(player.push_segment(&segment(50)), Transition::Unchanged);
        assert!(!player.is_live());
        assert_eq!(player.push_segment(&segment(50)), Transition::Started);
    }

    #[test]
    fn stale_events_are_ignored() {
        let (mut player, _, _) = player();
        assert_eq!(player.handle(PlayerEvent::Finished(42)), Transition::Unchanged);
        player.push_segment(&segment(50));
        assert_eq!(player.handle(PlayerEvent::FadeSettled(1)), Transition::Unchanged);
        assert!(player.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_fades_then_settles() {
        let (mut player, probe, events) = player();
        player.push_segment(&segment(500));
        player.push_segment(&segment(100));
        player.push_segment(&segment(100));

        assert_eq!(player.interrupt(), 2);
        assert_eq!(player.queued(), 0);
        assert!(player.is_live());
        assert_eq!(probe.ramps().len(), 1);

        tokio::time::sleep(Duration::from_millis(61)).await;
        let settled = events.lock().unwrap().pop().unwrap();
        assert_eq!(settled, PlayerEvent::FadeSettled(1));

        assert_eq!(player.handle(settled), Transition::Drained);
        assert!(!probe.is_playing());
        assert!((probe.gain() - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn segments_after_interrupt_play_once_fade_settles() {
        let (mut player, probe, events) = player();
        player.push_segment(&segment(500));
        player.interrupt();
        player.push_segment(&segment(100));
        assert_eq!(player.queued(), 1);

        tokio::time::sleep(Duration::from_millis(61)).await;
        let settled = events.lock().unwrap().pop().unwrap();
        assert_eq!(player.handle(settled), Transition::Started);
        assert_eq!(probe.played().len(), 2);
    }

    #[test]
    fn reset_stops_and_clears() {
        let (mut player, probe, _) = player();
        player.push_segment(&segment(100));
        player.push_segment(&segment(100));
        player.reset();
        assert!(!player.is_live());
        assert_eq!(player.queued(), 0);
        assert!(!probe.is_playing());
    }
}
