//! Session integration tests
//!
//! Drive a full session against the in-memory transport, microphone and
//! speaker. Time is paused so watchdog and fade timings are exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use parley::transport::TransportEvent;
use parley::transport::memory::ConnectMode;
use parley::{Config, ProcessingState, Role, SessionState, Subscription, TranscriptEntry};
use tokio::time::Instant;

mod common;

use common::{
    Harness, RATE, assistant_message, audio_output, settle, user_message, wait_until,
    wav_segment,
};

const ONE_SECOND: Duration = Duration::from_secs(1);

async fn tick() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn start_session_becomes_active_and_declares_audio_format() {
    let h = Harness::new();

    assert!(h.session.start_session().await);
    assert_eq!(h.session.status().state, SessionState::Active);
    assert_eq!(h.session.processing(), ProcessingState::Listening);

    let mut peer = h.connector.next_peer().await.unwrap();
    let settings: serde_json::Value = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
    assert_eq!(settings["type"], "session_settings");
    assert_eq!(settings["audio"]["encoding"], "linear16");
    assert_eq!(settings["audio"]["sample_rate"], 16_000);
    assert_eq!(settings["audio"]["channels"], 1);

    assert_eq!(h.states(), vec![SessionState::Connecting, SessionState::Active]);
    assert!(h.mic.is_open());
    let config = h.mic.last_config().unwrap();
    assert!(config.echo_cancellation && config.noise_suppression && config.auto_gain_control);

    let last = *h.indicators.lock().unwrap().last().unwrap();
    assert_eq!(last.state, SessionState::Active);
    assert_eq!(last.processing, ProcessingState::Listening);
    assert!(last.capturing);
    assert!(!last.muted);
}

#[tokio::test(start_paused = true)]
async fn start_while_active_is_a_no_op() {
    let h = Harness::new();
    let _peer = h.connect().await;

    assert!(h.session.start_session().await);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.mic.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_open_one_channel() {
    let h = Harness::new();
    h.connector.set_mode(ConnectMode::Gated);

    let a = h.session.clone();
    let b = h.session.clone();
    let first = tokio::spawn(async move { a.start_session().await });
    let second = tokio::spawn(async move { b.start_session().await });

    assert!(wait_until(Duration::from_millis(10), || h.connector.attempts() == 1).await);
    settle().await;
    assert_eq!(h.session.status().state, SessionState::Connecting);

    h.connector.release();
    assert!(first.await.unwrap());
    assert!(second.await.unwrap());
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.session.status().state, SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_lands_in_error() {
    let h = Harness::new();
    h.connector.set_mode(ConnectMode::Fail("credentials rejected".to_string()));

    assert!(!h.session.start_session().await);

    let status = h.session.status();
    assert_eq!(status.state, SessionState::Error);
    assert!(status.error.unwrap().contains("credentials rejected"));
    assert_eq!(h.states(), vec![SessionState::Connecting, SessionState::Error]);
    assert!(!h.mic.is_open());

    // Error is not terminal
    h.connector.set_mode(ConnectMode::Accept);
    assert!(h.session.start_session().await);
    assert_eq!(h.session.status().error, None);
}

#[tokio::test(start_paused = true)]
async fn watchdog_fails_a_hung_connect() {
    let h = Harness::new();
    h.connector.set_mode(ConnectMode::Hang);

    let started = Instant::now();
    assert!(!h.session.start_session().await);

    assert!(started.elapsed() >= Duration::from_secs(30));
    let status = h.session.status();
    assert_eq!(status.state, SessionState::Error);
    assert!(status.error.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn watchdog_honours_configured_timeout() {
    let mut config = Config::default();
    config.connection.connect_timeout = Duration::from_secs(5);
    let h = Harness::with_config(config);
    h.connector.set_mode(ConnectMode::Hang);

    let started = Instant::now();
    assert!(!h.session.start_session().await);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn end_session_from_idle() {
    let h = Harness::new();
    assert!(h.session.end_session().await);
    assert_eq!(h.session.status().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn end_session_while_connecting_cancels_attempt() {
    let h = Harness::new();
    h.connector.set_mode(ConnectMode::Hang);

    let s = h.session.clone();
    let pending = tokio::spawn(async move { s.start_session().await });
    assert!(
        wait_until(Duration::from_millis(10), || h.session.status().state
            == SessionState::Connecting)
        .await
    );

    assert!(h.session.end_session().await);
    assert!(!pending.await.unwrap());
    assert_eq!(h.session.status().state, SessionState::Idle);

    // The watchdog of the cancelled attempt must not fire
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.session.status().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn late_connect_after_end_is_closed() {
    let h = Harness::new();
    h.connector.set_mode(ConnectMode::Gated);

    let s = h.session.clone();
    let pending = tokio::spawn(async move { s.start_session().await });
    assert!(wait_until(Duration::from_millis(10), || h.connector.attempts() == 1).await);

    assert!(h.session.end_session().await);
    assert!(!pending.await.unwrap());
    h.connector.release();
    tick().await;

    // The aborted attempt never hands out a channel
    assert_eq!(h.session.status().state, SessionState::Idle);
    assert!(!h.mic.is_open());
}

#[tokio::test(start_paused = true)]
async fn end_session_while_active_releases_everything() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    tick().await;
    assert!(h.speaker.is_playing());

    assert!(h.session.end_session().await);

    assert_eq!(h.session.status().state, SessionState::Idle);
    assert_eq!(h.session.processing(), ProcessingState::Idle);
    assert!(!h.mic.is_open());
    assert!(!h.speaker.is_playing());
    assert!(!peer.is_client_listening());

    // The queued segment was discarded, not played on a later session
    let _peer = h.connect().await;
    tick().await;
    assert_eq!(h.speaker.played().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn three_segments_play_back_to_back_without_gaps() {
    let h = Harness::new();
    let peer = h.connect().await;

    for _ in 0..3 {
        peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    }
    tick().await;

    assert_eq!(h.session.processing(), ProcessingState::Speaking);
    let played = h.speaker.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].samples.len(), RATE as usize);

    // The first segment plays on arrival; the rest merge into one spliced buffer
    assert!(h.speaker.complete());
    tick().await;
    let played = h.speaker.played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[1].segments, 2);
    assert_eq!(played[1].samples.len(), 2 * RATE as usize - 221);
    assert_eq!(h.session.processing(), ProcessingState::Speaking);

    // Turn end while audio is live changes nothing
    peer.send_text(r#"{"type":"assistant_end"}"#).await;
    tick().await;
    assert_eq!(h.session.processing(), ProcessingState::Speaking);
    assert!(h.speaker.is_playing());

    assert!(h.speaker.complete());
    tick().await;
    assert_eq!(h.session.processing(), ProcessingState::Listening);
    assert_eq!(h.speaker.played().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn user_speech_cuts_playback_within_one_fade_cycle() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    tick().await;
    assert_eq!(h.session.processing(), ProcessingState::Speaking);

    let interrupted = Instant::now();
    peer.send_text(&user_message("hold on")).await;

    assert!(wait_until(Duration::from_millis(100), || !h.speaker.is_playing()).await);
    assert!(interrupted.elapsed() <= Duration::from_millis(61));
    assert_eq!(h.session.processing(), ProcessingState::Listening);

    let ramps = h.speaker.ramps();
    assert_eq!(ramps.len(), 1);
    assert_eq!(ramps[0].duration, Duration::from_millis(50));
    assert!((h.speaker.gain() - 1.0).abs() < f32::EPSILON);

    // The queued segment was dropped with the interruption
    tick().await;
    assert_eq!(h.speaker.played().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn audio_after_interruption_plays_once_fade_settles() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    tick().await;
    peer.send_text(r#"{"type":"user_interruption"}"#).await;
    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    tick().await;
    assert_eq!(h.speaker.played().len(), 1);

    tokio::time::sleep(Duration::from_millis(70)).await;
    assert_eq!(h.speaker.played().len(), 2);
    assert_eq!(h.session.processing(), ProcessingState::Speaking);
}

#[tokio::test(start_paused = true)]
async fn malformed_segment_does_not_wedge_playback() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(&audio_output(b"RIFF\x04\x00\x00\x00WAVE")).await;
    peer.send_text(r#"{"type":"audio_output","data":"!!not base64!!"}"#)
        .await;
    tick().await;
    assert!(h.speaker.played().is_empty());
    assert_eq!(h.session.status().state, SessionState::Active);

    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    tick().await;
    assert_eq!(h.speaker.played().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_events_change_nothing() {
    let h = Harness::new();
    let peer = h.connect().await;
    let indicators_before = h.indicators.lock().unwrap().len();

    peer.send_text(r#"{"type":"tool_call","name":"lookup"}"#).await;
    peer.send_text(r#"{"type":"error","message":"Unknown message type: pause"}"#)
        .await;
    peer.send_text("not json at all").await;
    peer.send_text(r#"{"no_type":true}"#).await;
    tick().await;

    assert_eq!(h.session.status().state, SessionState::Active);
    assert_eq!(h.session.processing(), ProcessingState::Listening);
    assert_eq!(h.states(), vec![SessionState::Connecting, SessionState::Active]);
    assert_eq!(h.indicators.lock().unwrap().len(), indicators_before);
}

#[tokio::test(start_paused = true)]
async fn transcript_and_processing_follow_the_conversation() {
    let h = Harness::new();
    let entries: Arc<Mutex<Vec<TranscriptEntry>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&entries);
    h.session
        .on_transcript(move |e| sink.lock().unwrap().push(e.clone()));
    let peer = h.connect().await;

    peer.send_text(&assistant_message("Let me think")).await;
    tick().await;
    assert_eq!(h.session.processing(), ProcessingState::Thinking);

    peer.send_text(r#"{"type":"assistant_end"}"#).await;
    tick().await;
    assert_eq!(h.session.processing(), ProcessingState::Listening);

    peer.send_text(
        r#"{"type":"user_message","message":{"role":"user","content":"wha"},"interim":true}"#,
    )
    .await;
    peer.send_text(&user_message("what time is it")).await;
    tick().await;

    let entries = entries.lock().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].role, Role::Assistant);
    assert_eq!(entries[0].content, "Let me think");
    assert!(entries[1].interim);
    assert_eq!(entries[2].role, Role::User);
    assert!(!entries[2].interim);
}

#[tokio::test(start_paused = true)]
async fn assistant_text_while_speaking_stays_speaking() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(&audio_output(&wav_segment(ONE_SECOND))).await;
    peer.send_text(&assistant_message("more words")).await;
    tick().await;
    assert_eq!(h.session.processing(), ProcessingState::Speaking);
}

#[tokio::test(start_paused = true)]
async fn toggle_mute_stops_and_restarts_capture() {
    let h = Harness::new();
    let _peer = h.connect().await;
    assert!(h.mic.is_open());

    assert!(h.session.toggle_mute().await);
    assert!(h.session.is_muted());
    assert!(!h.mic.is_open());
    let last = *h.indicators.lock().unwrap().last().unwrap();
    assert!(last.muted && !last.capturing);

    assert!(!h.session.toggle_mute().await);
    assert!(!h.session.is_muted());
    assert!(h.mic.is_open());
    assert_eq!(h.mic.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn mute_persists_across_sessions() {
    let mut config = Config::default();
    config.capture.start_muted = true;
    let h = Harness::with_config(config);
    assert!(h.session.is_muted());

    let _peer = h.connect().await;
    assert_eq!(h.mic.opens(), 0);

    // Unmuting while idle only flips the flag
    assert!(h.session.end_session().await);
    assert!(!h.session.toggle_mute().await);
    assert_eq!(h.mic.opens(), 0);

    let _peer = h.connect().await;
    assert_eq!(h.mic.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn denied_microphone_leaves_session_active() {
    let h = Harness::new();
    h.mic.deny("permission denied");

    let _peer = h.connect().await;
    assert_eq!(h.session.status().state, SessionState::Active);
    assert!(!h.mic.is_open());
    let last = *h.indicators.lock().unwrap().last().unwrap();
    assert!(!last.capturing);

    h.mic.allow();
    assert!(h.session.toggle_mute().await);
    assert!(!h.session.toggle_mute().await);
    assert!(h.mic.is_open());
}

#[tokio::test(start_paused = true)]
async fn microphone_frames_are_sent_every_interval() {
    let h = Harness::new();
    let mut peer = h.connect().await;

    h.mic.speak(&vec![0.25; 1600]);
    tokio::time::sleep(Duration::from_millis(101)).await;

    let frame: serde_json::Value = serde_json::from_str(&peer.try_recv().unwrap()).unwrap();
    assert_eq!(frame["type"], "audio_input");
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(frame["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(pcm.len(), 3200);

    // Silence from the device produces no frame
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(peer.try_recv().is_none());

    h.mic.speak(&[0.1; 160]);
    h.mic.speak(&[0.2; 160]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let frame: serde_json::Value = serde_json::from_str(&peer.try_recv().unwrap()).unwrap();
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(frame["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(pcm.len(), 640);
}

#[tokio::test(start_paused = true)]
async fn failed_frame_send_stops_capture_but_keeps_session() {
    let h = Harness::new();
    let mut peer = h.connect().await;
    tick().await;
    assert!(h.mic.is_open());

    peer.stop_receiving();
    h.mic.speak(&vec![0.25; 1600]);
    tokio::time::sleep(Duration::from_millis(101)).await;

    assert!(!h.mic.is_open());
    let last = *h.indicators.lock().unwrap().last().unwrap();
    assert!(!last.capturing);
    assert_eq!(last.state, SessionState::Active);
    assert_eq!(h.session.status().state, SessionState::Active);
    assert!(peer.is_client_listening());
}

#[tokio::test(start_paused = true)]
async fn send_message_requires_an_open_channel() {
    let h = Harness::new();
    assert!(!h.session.send_message("anyone there?").await);

    let mut peer = h.connect().await;
    assert!(h.session.send_message("hello").await);

    let message: serde_json::Value = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
    assert_eq!(message["type"], "user_input");
    assert_eq!(message["text"], "hello");
}

#[tokio::test(start_paused = true)]
async fn remote_close_returns_to_idle() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.close(1000, "conversation over").await;
    assert!(
        wait_until(Duration::from_millis(10), || h.session.status().state
            == SessionState::Idle)
        .await
    );
    assert_eq!(h.session.status().error, None);
    assert!(!h.mic.is_open());
    assert_eq!(h.session.processing(), ProcessingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn dropped_transport_returns_to_idle() {
    let h = Harness::new();
    let peer = h.connect().await;
    drop(peer);

    assert!(
        wait_until(Duration::from_millis(10), || h.session.status().state
            == SessionState::Idle)
        .await
    );
}

#[tokio::test(start_paused = true)]
async fn agent_error_lands_in_error() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(r#"{"type":"error","message":"quota exceeded","code":"E0300"}"#)
        .await;
    assert!(
        wait_until(Duration::from_millis(10), || h.session.status().state
            == SessionState::Error)
        .await
    );
    assert_eq!(h.session.status().error.as_deref(), Some("quota exceeded"));
    assert!(!h.mic.is_open());
}

#[tokio::test(start_paused = true)]
async fn end_session_from_error_returns_to_idle() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_text(r#"{"type":"error","message":"quota exceeded"}"#)
        .await;
    assert!(
        wait_until(Duration::from_millis(10), || h.session.status().state
            == SessionState::Error)
        .await
    );

    assert!(h.session.end_session().await);
    let status = h.session.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.error, None);
    assert_eq!(h.session.processing(), ProcessingState::Idle);
    assert_eq!(h.states().last(), Some(&SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn transport_error_lands_in_error() {
    let h = Harness::new();
    let peer = h.connect().await;

    peer.send_event(TransportEvent::Error("connection reset".to_string()))
        .await;
    assert!(
        wait_until(Duration::from_millis(10), || h.session.status().state
            == SessionState::Error)
        .await
    );
    assert!(!peer.is_client_listening());
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_tears_down() {
    let h = Harness::new();
    let peer = h.connect().await;
    let mic = h.mic.clone();
    drop(h);

    assert!(wait_until(Duration::from_millis(10), || !peer.is_client_listening()).await);
    assert!(!mic.is_open());
}

#[tokio::test(start_paused = true)]
async fn subscriber_can_unsubscribe_itself_mid_broadcast() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let counter = Arc::clone(&calls);
    let inner = Arc::clone(&slot);
    let sub = h.session.on_status_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(mut sub) = inner.lock().unwrap().take() {
            sub.unsubscribe();
        }
    });
    *slot.lock().unwrap() = Some(sub);

    let _peer = h.connect().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Other subscribers kept receiving
    assert_eq!(h.states(), vec![SessionState::Connecting, SessionState::Active]);
}
