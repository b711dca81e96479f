//! Wire protocol adapter
//!
//! Translates inbound JSON envelopes into [`DomainEvent`]s and serializes
//! outbound commands. Anything the adapter does not recognise is logged and
//! dropped; the remote vocabulary is allowed to grow.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::transport::TransportEvent;

/// Error text the agent sends for messages it doesn't understand
const UNKNOWN_MESSAGE_TYPE: &str = "unknown message type";

/// Closed set of events the session reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// Channel handshake completed
    ChannelOpened,
    /// Channel closed by either side
    ChannelClosed { code: Option<u16>, reason: String },
    /// Transport or agent reported a fatal error
    ChannelError(String),
    /// One WAV-wrapped speech segment (base64 already decoded)
    AudioOutput(Vec<u8>),
    /// Assistant transcript text
    AssistantTextChunk(String),
    /// User transcript text; evidence the user is speaking
    UserTextChunk { content: String, interim: bool },
    /// Agent detected the user talking over it
    UserInterruption,
    /// Agent finished its turn
    AssistantTurnEnd,
    /// Chat identifiers for the current conversation
    ChatMetadata {
        chat_id: Option<String>,
        chat_group_id: Option<String>,
    },
}

/// Inbound message envelope
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    AudioOutput {
        data: String,
    },
    AssistantMessage {
        message: ChatMessage,
    },
    UserMessage {
        message: ChatMessage,
        #[serde(default)]
        interim: bool,
    },
    UserInterruption,
    AssistantEnd,
    ChatMetadata {
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        chat_group_id: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Role/content pair carried by transcript messages
#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Outbound message envelope
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Microphone frame, base64 linear16 PCM
    AudioInput { data: String },
    /// Typed user text
    UserInput { text: String },
    /// Declares the format of outbound audio frames
    SessionSettings { audio: AudioSettings },
}

/// Outbound audio format declaration
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AudioSettings {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSettings {
    /// Raw little-endian 16-bit PCM at the given rate
    #[must_use]
    pub fn linear16(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: "linear16".to_string(),
            sample_rate,
            channels,
        }
    }
}

/// Translate a transport event into a domain event
///
/// Returns `None` for protocol noise.
#[must_use]
pub fn translate(event: TransportEvent) -> Option<DomainEvent> {
    match event {
        TransportEvent::Opened => Some(DomainEvent::ChannelOpened),
        TransportEvent::Message(text) => parse_message(&text),
        TransportEvent::Closed { code, reason } => Some(DomainEvent::ChannelClosed { code, reason }),
        TransportEvent::Error(reason) => Some(DomainEvent::ChannelError(reason)),
    }
}

/// Parse one inbound text frame
///
/// Returns `None` for unrecognised or malformed envelopes.
#[must_use]
pub fn parse_message(text: &str) -> Option<DomainEvent> {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(error = %e, len = text.len(), "ignoring malformed inbound message");
            return None;
        }
    };

    match inbound {
        Inbound::AudioOutput { data } => {
            match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
                Ok(bytes) => Some(DomainEvent::AudioOutput(bytes)),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping audio_output with invalid base64");
                    None
                }
            }
        }
        Inbound::AssistantMessage { message } => Some(DomainEvent::AssistantTextChunk(
            message.content.unwrap_or_default(),
        )),
        Inbound::UserMessage { message, interim } => {
            if message.role.as_deref().is_some_and(|r| r != "user") {
                tracing::debug!(role = ?message.role, "user_message with unexpected role");
            }
            Some(DomainEvent::UserTextChunk {
                content: message.content.unwrap_or_default(),
                interim,
            })
        }
        Inbound::UserInterruption => Some(DomainEvent::UserInterruption),
        Inbound::AssistantEnd => Some(DomainEvent::AssistantTurnEnd),
        Inbound::ChatMetadata {
            chat_id,
            chat_group_id,
        } => Some(DomainEvent::ChatMetadata {
            chat_id,
            chat_group_id,
        }),
        Inbound::Error { message, code } => {
            if message.to_lowercase().contains(UNKNOWN_MESSAGE_TYPE) {
                tracing::debug!(message, "agent did not recognise a message, ignoring");
                None
            } else {
                tracing::warn!(message, code = ?code, "agent reported error");
                Some(DomainEvent::ChannelError(message))
            }
        }
        Inbound::Unknown => {
            tracing::debug!(len = text.len(), "ignoring unknown inbound message type");
            None
        }
    }
}

/// Serializes outbound commands onto the open channel
///
/// Every send returns `false` rather than an error when there is no channel.
#[derive(Debug, Default)]
pub struct ProtocolAdapter {
    sender: Option<mpsc::Sender<String>>,
}

impl ProtocolAdapter {
    /// Create an adapter with no channel attached
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the writer half of a freshly opened channel
    pub fn attach(&mut self, sender: mpsc::Sender<String>) {
        self.sender = Some(sender);
    }

    /// Detach the current channel; dropping the sender closes the writer
    pub fn detach(&mut self) {
        self.sender = None;
    }

    /// Check whether a channel is attached and still accepting writes
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Send one microphone frame of linear16 PCM
    pub async fn send_user_audio_frame(&self, pcm: &[u8]) -> bool {
        let data = base64::engine::general_purpose::STANDARD.encode(pcm);
        self.send(&Outbound::AudioInput { data }).await
    }

    /// Send typed user text
    pub async fn send_user_text(&self, text: &str) -> bool {
        self.send(&Outbound::UserInput {
            text: text.to_string(),
        })
        .await
    }

    /// Declare the outbound audio format
    pub async fn send_session_settings(&self, audio: AudioSettings) -> bool {
        self.send(&Outbound::SessionSettings { audio }).await
    }

    async fn send(&self, message: &Outbound) -> bool {
        let Some(tx) = self.sender.as_ref() else {
            tracing::debug!("no channel open, dropping outbound message");
            return false;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound message");
                return false;
            }
        };

        tx.send(text).await.is_ok()
    }
}
