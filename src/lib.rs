//! Parley - real-time full-duplex voice conversation client
//!
//! This library provides the core of a voice session with a remote
//! conversational agent:
//! - Microphone capture streamed as 16 kHz linear16 frames
//! - Gapless playback of synthesized speech segments
//! - Barge-in: fading out the agent when the user talks over it
//! - A session state machine with observer notifications
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Session (actor task)                 │
//! │   State machine  │  Notification hub  │  Watchdog   │
//! └───────┬──────────────────┬──────────────────┬───────┘
//!         │                  │                  │
//! ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//! │    Capture    │  │   Protocol    │  │    Player     │
//! │  cpal / mem   │  │    adapter    │  │ compositor +  │
//! │               │  │               │  │ interruption  │
//! └───────────────┘  └───────┬───────┘  └───────────────┘
//!                            │
//!                    ┌───────▼───────┐
//!                    │   Transport   │
//!                    │ WebSocket/mem │
//!                    └───────────────┘
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{DomainEvent, ProtocolAdapter};
pub use session::{
    Backends, ProcessingState, Role, Session, SessionState, SessionStatus, Subscription,
    TranscriptEntry, VisualIndicator,
};
pub use transport::{Connector, MemoryConnector, WsConnector};
