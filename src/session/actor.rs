//! The task that owns a session's resources

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::notify::NotificationHub;
use super::state::{
    ProcessingState, Role, SessionState, SessionStatus, TranscriptEntry, VisualIndicator,
};
use super::{Backends, Command, Snapshot};
use crate::Result;
use crate::config::Config;
use crate::protocol::{self, AudioSettings, DomainEvent, ProtocolAdapter};
use crate::transport::{Channel, ChannelCloser, Connector, TransportEvent};
use crate::voice::wav::f32_to_pcm16;
use crate::voice::{CaptureDevice, CaptureStream, Player, PlayerEvent, PlayerNotify, Transition};

/// Completions of work the actor started
///
/// Generation and epoch tags let the actor drop completions that belong to
/// a torn-down attempt or capture.
enum Internal {
    Connected { generation: u64, result: Result<Channel> },
    Watchdog { generation: u64 },
    Player(PlayerEvent),
    CaptureTick { epoch: u64 },
}

/// Open microphone plus the ticker that flushes it
struct CaptureSession {
    stream: Box<dyn CaptureStream>,
    ticker: JoinHandle<()>,
    epoch: u64,
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

struct Actor {
    config: Config,
    connector: Arc<dyn Connector>,
    capture_device: Arc<dyn CaptureDevice>,
    player: Player,
    adapter: ProtocolAdapter,
    hub: Arc<NotificationHub>,
    snapshot: watch::Sender<Snapshot>,
    internal: mpsc::UnboundedSender<Internal>,

    status: SessionStatus,
    processing: ProcessingState,
    muted: bool,

    generation: u64,
    pending_starts: Vec<oneshot::Sender<bool>>,
    connect_task: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,

    inbound: Option<mpsc::Receiver<TransportEvent>>,
    closer: Option<ChannelCloser>,

    capture: Option<CaptureSession>,
    capture_epoch: u64,
}

pub(super) fn spawn(
    config: Config,
    backends: Backends,
    hub: Arc<NotificationHub>,
    snapshot: watch::Sender<Snapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
) {
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let player_tx = internal_tx.clone();
    let notify: PlayerNotify = Arc::new(move |event| {
        let _ = player_tx.send(Internal::Player(event));
    });
    let player = Player::new(&config.playback, backends.output, notify);
    let muted = config.capture.start_muted;

    let actor = Actor {
        config,
        connector: backends.connector,
        capture_device: backends.capture,
        player,
        adapter: ProtocolAdapter::new(),
        hub,
        snapshot,
        internal: internal_tx,
        status: SessionStatus::default(),
        processing: ProcessingState::Idle,
        muted,
        generation: 0,
        pending_starts: Vec::new(),
        connect_task: None,
        watchdog: None,
        inbound: None,
        closer: None,
        capture: None,
        capture_epoch: 0,
    };

    tokio::spawn(actor.run(commands, internal_rx));
}

/// Next event from the open channel; pends forever when there is none
async fn next_inbound(inbound: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    match inbound {
        Some(rx) => rx.recv().await.unwrap_or_else(|| TransportEvent::Closed {
            code: None,
            reason: "transport ended".to_string(),
        }),
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        tracing::debug!("session task started");

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event).await,
                event = next_inbound(&mut self.inbound) => self.handle_transport(event),
            }
        }

        self.teardown(SessionStatus::new(SessionState::Idle));
        tracing::debug!("all session handles dropped, session task exiting");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => self.start(reply),
            Command::End(reply) => {
                tracing::info!(state = %self.status.state, "ending session");
                self.teardown(SessionStatus::new(SessionState::Idle));
                self.publish();
                let _ = reply.send(true);
            }
            Command::ToggleMute(reply) => {
                self.muted = !self.muted;
                tracing::info!(muted = self.muted, "microphone mute toggled");
                if self.muted {
                    self.stop_capture();
                } else if self.status.state == SessionState::Active {
                    self.start_capture();
                }
                self.publish();
                let _ = reply.send(self.muted);
            }
            Command::SendText(text, reply) => {
                let sent =
                    self.status.state == SessionState::Active && self.adapter.send_user_text(&text).await;
                if !sent {
                    tracing::warn!(state = %self.status.state, "cannot send message without an open channel");
                }
                let _ = reply.send(sent);
            }
        }
    }

    fn start(&mut self, reply: oneshot::Sender<bool>) {
        match self.status.state {
            SessionState::Active => {
                let _ = reply.send(true);
            }
            SessionState::Connecting => {
                tracing::debug!("start requested while connecting, joining attempt");
                self.pending_starts.push(reply);
            }
            SessionState::Idle | SessionState::Error => {
                self.generation += 1;
                let generation = self.generation;
                tracing::info!(generation, endpoint = %self.config.connection.endpoint, "connecting");

                self.pending_starts.push(reply);
                self.status = SessionStatus::new(SessionState::Connecting);

                let connector = Arc::clone(&self.connector);
                let connection = self.config.connection.clone();
                let tx = self.internal.clone();
                self.connect_task = Some(tokio::spawn(async move {
                    let result = connector.connect(&connection).await;
                    let _ = tx.send(Internal::Connected { generation, result });
                }));

                let timeout = self.config.connection.connect_timeout;
                let tx = self.internal.clone();
                self.watchdog = Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(Internal::Watchdog { generation });
                }));

                self.publish();
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Connected { generation, result } => self.connected(generation, result).await,
            Internal::Watchdog { generation } => {
                if generation == self.generation && self.status.state == SessionState::Connecting {
                    let timeout = self.config.connection.connect_timeout;
                    tracing::error!(timeout_secs = timeout.as_secs(), "connection timed out");
                    self.teardown(SessionStatus::failed(format!(
                        "connection timed out after {}s",
                        timeout.as_secs()
                    )));
                    self.publish();
                }
            }
            Internal::Player(event) => match self.player.handle(event) {
                Transition::Started => self.set_processing(ProcessingState::Speaking),
                Transition::Drained => self.set_processing(ProcessingState::Listening),
                Transition::Unchanged => {}
            },
            Internal::CaptureTick { epoch } => self.flush_capture(epoch).await,
        }
    }

    async fn connected(&mut self, generation: u64, result: Result<Channel>) {
        if generation != self.generation || self.status.state != SessionState::Connecting {
            if let Ok(channel) = result {
                tracing::debug!(generation, "closing channel from a superseded attempt");
                channel.close();
            }
            return;
        }
        self.connect_task = None;

        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!(error = %e, "failed to connect");
                self.teardown(SessionStatus::failed(e.to_string()));
                self.publish();
                return;
            }
        };

        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }

        let (outbound, inbound, closer) = channel.split();
        self.adapter.attach(outbound);
        self.inbound = Some(inbound);
        self.closer = Some(closer);
        self.status = SessionStatus::new(SessionState::Active);
        self.processing = ProcessingState::Listening;
        tracing::info!(generation, "voice session active");

        let settings = AudioSettings::linear16(
            self.config.capture.sample_rate,
            self.config.capture.channels,
        );
        if !self.adapter.send_session_settings(settings).await {
            tracing::warn!("failed to send session settings");
        }

        self.start_capture();
        self.resolve_starts(true);
        self.publish();
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        if let Some(event) = protocol::translate(event) {
            self.handle_domain(event);
        }
    }

    fn handle_domain(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::ChannelOpened => {
                tracing::debug!("channel opened");
                self.set_processing(ProcessingState::Listening);
            }
            DomainEvent::ChannelClosed { code, reason } => {
                tracing::info!(?code, %reason, "channel closed");
                self.teardown(SessionStatus::new(SessionState::Idle));
                self.publish();
            }
            DomainEvent::ChannelError(reason) => {
                tracing::error!(%reason, "channel error");
                self.teardown(SessionStatus::failed(reason));
                self.publish();
            }
            DomainEvent::AudioOutput(wav) => {
                if self.player.push_segment(&wav) == Transition::Started {
                    self.set_processing(ProcessingState::Speaking);
                }
            }
            DomainEvent::AssistantTextChunk(content) => {
                self.hub.publish_transcript(&TranscriptEntry {
                    role: Role::Assistant,
                    content,
                    interim: false,
                });
                if self.processing != ProcessingState::Speaking {
                    self.set_processing(ProcessingState::Thinking);
                }
            }
            DomainEvent::UserTextChunk { content, interim } => {
                self.hub.publish_transcript(&TranscriptEntry {
                    role: Role::User,
                    content,
                    interim,
                });
                self.barge_in();
            }
            DomainEvent::UserInterruption => self.barge_in(),
            DomainEvent::AssistantTurnEnd => {
                if !self.player.is_live() && self.player.queued() == 0 {
                    self.set_processing(ProcessingState::Listening);
                }
            }
            DomainEvent::ChatMetadata {
                chat_id,
                chat_group_id,
            } => {
                tracing::info!(?chat_id, ?chat_group_id, "chat started");
            }
        }
    }

    fn barge_in(&mut self) {
        if self.player.is_live() || self.player.queued() > 0 {
            let dropped = self.player.interrupt();
            tracing::debug!(dropped, "user barged in");
        }
        self.set_processing(ProcessingState::Listening);
    }

    fn start_capture(&mut self) -> bool {
        if self.muted || !self.adapter.is_open() || self.status.state != SessionState::Active {
            return false;
        }
        if self.capture.is_some() {
            return true;
        }

        let stream = match self.capture_device.open(&self.config.capture) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open microphone");
                return false;
            }
        };

        self.capture_epoch += 1;
        let epoch = self.capture_epoch;
        let period = self.config.capture.frame_interval;
        let tx = self.internal.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Internal::CaptureTick { epoch }).is_err() {
                    break;
                }
            }
        });

        self.capture = Some(CaptureSession {
            stream,
            ticker,
            epoch,
        });
        tracing::info!(
            sample_rate = self.config.capture.sample_rate,
            interval_ms = period.as_millis(),
            "microphone capture started"
        );
        true
    }

    fn stop_capture(&mut self) {
        if self.capture.take().is_some() {
            tracing::info!("microphone capture stopped");
        }
    }

    async fn flush_capture(&mut self, epoch: u64) {
        let Some(capture) = self.capture.as_mut().filter(|c| c.epoch == epoch) else {
            return;
        };

        let samples = capture.stream.take_samples();
        if samples.is_empty() {
            return;
        }

        let pcm = f32_to_pcm16(&samples);
        if !self.adapter.send_user_audio_frame(&pcm).await {
            tracing::warn!(bytes = pcm.len(), "failed to send audio frame, stopping capture");
            self.stop_capture();
            self.publish();
        }
    }

    fn set_processing(&mut self, processing: ProcessingState) {
        if self.processing != processing {
            tracing::debug!(from = %self.processing, to = %processing, "processing state");
            self.processing = processing;
            self.publish();
        }
    }

    /// Release everything and land on `status`
    fn teardown(&mut self, status: SessionStatus) {
        self.generation += 1;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }

        self.stop_capture();
        self.adapter.detach();
        self.inbound = None;
        if let Some(closer) = self.closer.take() {
            closer.close();
        }

        self.player.reset();
        self.processing = ProcessingState::Idle;
        self.status = status;
        self.resolve_starts(false);
    }

    fn resolve_starts(&mut self, outcome: bool) {
        for reply in self.pending_starts.drain(..) {
            let _ = reply.send(outcome);
        }
    }

    fn indicator(&self) -> VisualIndicator {
        VisualIndicator {
            state: self.status.state,
            processing: self.processing,
            muted: self.muted,
            capturing: self.capture.is_some(),
        }
    }

    /// Update the snapshot, then notify subscribers
    fn publish(&self) {
        self.snapshot.send_replace(Snapshot {
            status: self.status.clone(),
            processing: self.processing,
            muted: self.muted,
        });
        self.hub.publish_status(&self.status);
        self.hub.publish_indicator(&self.indicator());
    }
}
