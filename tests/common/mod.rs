//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use parley::transport::MemoryPeer;
use parley::voice::wav::samples_to_wav;
use parley::voice::{MemoryCapture, MemoryMicrophone, MemoryOutput, MemoryOutputProbe};
use parley::{Backends, Config, MemoryConnector, Session, SessionStatus, VisualIndicator};

/// Rate used for both synthesized segments and the fake speaker
pub const RATE: u32 = 44_100;

/// A session wired to in-memory backends
pub struct Harness {
    pub session: Session,
    pub connector: MemoryConnector,
    pub mic: MemoryMicrophone,
    pub speaker: MemoryOutputProbe,
    pub statuses: Arc<Mutex<Vec<SessionStatus>>>,
    pub indicators: Arc<Mutex<Vec<VisualIndicator>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let connector = MemoryConnector::new();
        let (capture, mic) = MemoryCapture::new();
        let (output, speaker) = MemoryOutput::new(RATE);

        let session = Session::new(
            config,
            Backends {
                connector: Arc::new(connector.clone()),
                capture: Arc::new(capture),
                output: Box::new(output),
            },
        );

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        session.on_status_change(move |s| sink.lock().unwrap().push(s.clone()));

        let indicators = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&indicators);
        session.on_visual_indicator_change(move |i| sink.lock().unwrap().push(*i));

        Self {
            session,
            connector,
            mic,
            speaker,
            statuses,
            indicators,
        }
    }

    /// Start the session and return the agent side of the channel
    ///
    /// The `session_settings` message is consumed.
    pub async fn connect(&self) -> MemoryPeer {
        assert!(self.session.start_session().await, "session failed to start");
        let mut peer = self.connector.next_peer().await.expect("no peer");
        let settings = peer.recv().await.expect("no session settings");
        assert!(settings.contains("session_settings"));
        peer
    }

    pub fn states(&self) -> Vec<parley::SessionState> {
        self.statuses.lock().unwrap().iter().map(|s| s.state).collect()
    }
}

/// Poll `cond` every millisecond of (paused) time until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Let spawned tasks run without advancing time
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// A WAV-wrapped sine segment at [`RATE`]
pub fn wav_segment(duration: Duration) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (duration.as_secs_f64() * f64::from(RATE)) as usize;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..len)
        .map(|i| (i as f32 * 0.05).sin() * 0.3)
        .collect();
    samples_to_wav(&samples, RATE).expect("failed to encode segment")
}

/// An inbound `audio_output` envelope carrying `wav`
pub fn audio_output(wav: &[u8]) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(wav);
    serde_json::json!({ "type": "audio_output", "data": data }).to_string()
}

pub fn assistant_message(text: &str) -> String {
    serde_json::json!({
        "type": "assistant_message",
        "message": { "role": "assistant", "content": text }
    })
    .to_string()
}

pub fn user_message(text: &str) -> String {
    serde_json::json!({
        "type": "user_message",
        "message": { "role": "user", "content": text }
    })
    .to_string()
}
