//! Voice session
//!
//! A [`Session`] is a cheap handle onto one actor task that owns the channel,
//! the microphone and the speaker. Every operation, inbound event, playback
//! completion and timer goes through that task, so observers always see a
//! consistent (session state, processing state) pair.
//!
//! ```no_run
//! # async fn demo() -> parley::Result<()> {
//! use parley::session::{Backends, Session};
//!
//! let config = parley::Config::load()?;
//! let session = Session::new(config, Backends::native()?);
//! let _sub = session.on_status_change(|status| println!("{status}"));
//! session.start_session().await;
//! # Ok(())
//! # }
//! ```

mod actor;
pub mod notify;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::Result;
use crate::config::Config;
use crate::transport::{Connector, WsConnector};
use crate::voice::{AudioOutput, CaptureDevice, CpalCapture, CpalOutput};

pub use notify::{NotificationHub, Subscribers, Subscription};
pub use state::{ProcessingState, Role, SessionState, SessionStatus, TranscriptEntry, VisualIndicator};

/// Devices and transport a session runs against
pub struct Backends {
    pub connector: Arc<dyn Connector>,
    pub capture: Arc<dyn CaptureDevice>,
    pub output: Box<dyn AudioOutput>,
}

impl Backends {
    /// WebSocket transport plus the default cpal input and output devices
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn native() -> Result<Self> {
        Ok(Self {
            connector: Arc::new(WsConnector::new()),
            capture: Arc::new(CpalCapture::new()),
            output: Box::new(CpalOutput::new()?),
        })
    }
}

/// Requests from handles to the actor
enum Command {
    Start(oneshot::Sender<bool>),
    End(oneshot::Sender<bool>),
    ToggleMute(oneshot::Sender<bool>),
    SendText(String, oneshot::Sender<bool>),
}

/// Values readable without a round trip to the actor
#[derive(Debug, Clone, Default)]
struct Snapshot {
    status: SessionStatus,
    processing: ProcessingState,
    muted: bool,
}

/// Handle to a running voice session
///
/// Clones share the same session. When the last handle is dropped the
/// session tears down and its task exits.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    hub: Arc<NotificationHub>,
    snapshot: watch::Receiver<Snapshot>,
}

impl Session {
    /// Spawn the session actor
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime
    #[must_use]
    pub fn new(config: Config, backends: Backends) -> Self {
        let hub = Arc::new(NotificationHub::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let initial = Snapshot {
            muted: config.capture.start_muted,
            ..Snapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        actor::spawn(config, backends, Arc::clone(&hub), snapshot_tx, commands_rx);

        Self {
            commands: commands_tx,
            hub,
            snapshot: snapshot_rx,
        }
    }

    /// Open a channel to the agent
    ///
    /// Returns `true` once the session is active. While a connect is already
    /// in flight this waits for that attempt rather than starting another.
    pub async fn start_session(&self) -> bool {
        self.request(Command::Start).await.unwrap_or(false)
    }

    /// Tear everything down and return to idle
    pub async fn end_session(&self) -> bool {
        self.request(Command::End).await.unwrap_or(false)
    }

    /// Flip the microphone mute flag; returns the new muted state
    pub async fn toggle_mute(&self) -> bool {
        match self.request(Command::ToggleMute).await {
            Some(muted) => muted,
            None => self.is_muted(),
        }
    }

    /// Send typed text to the agent; `false` if no channel is open
    pub async fn send_message(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.request(|reply| Command::SendText(text, reply))
            .await
            .unwrap_or(false)
    }

    /// Current session status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status.clone()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.snapshot.borrow().muted
    }

    #[must_use]
    pub fn processing(&self) -> ProcessingState {
        self.snapshot.borrow().processing
    }

    /// Called whenever the session status changes
    pub fn on_status_change(
        &self,
        callback: impl Fn(&SessionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.on_status_change(callback)
    }

    /// Called on every indicator update
    pub fn on_visual_indicator_change(
        &self,
        callback: impl Fn(&VisualIndicator) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.on_visual_indicator_change(callback)
    }

    /// Called for every transcript line, interim ones included
    pub fn on_transcript(
        &self,
        callback: impl Fn(&TranscriptEntry) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.on_transcript(callback)
    }

    async fn request(&self, make: impl FnOnce(oneshot::Sender<bool>) -> Command) -> Option<bool> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(make(tx)).is_err() {
            tracing::warn!("session task has exited");
            return None;
        }
        rx.await.ok()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.borrow();
        f.debug_struct("Session")
            .field("status", &snapshot.status)
            .field("processing", &snapshot.processing)
            .field("muted", &snapshot.muted)
            .finish_non_exhaustive()
    }
}
