//! Bidirectional channel to the voice agent
//!
//! The session only sees the [`Connector`] trait: it hands over the
//! connection config and gets back an open [`Channel`]. The WebSocket
//! implementation lives in [`ws`], a scriptable in-memory one in [`memory`].

mod credentials;
pub mod memory;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;
use crate::config::ConnectionConfig;

pub use credentials::{Credentials, exchange_token};
pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

/// Capacity of the outbound writer queue
pub const OUTBOUND_CAPACITY: usize = 64;

/// Something the transport observed on the open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; always the first event on a channel
    Opened,
    /// Text frame from the agent
    Message(String),
    /// Channel closed (close frame or end of stream)
    Closed { code: Option<u16>, reason: String },
    /// Transport-level failure
    Error(String),
}

/// An open channel
///
/// Dropping `outbound` lets the writer drain and exit; closing the
/// [`ChannelCloser`] additionally stops the reader so no further events are
/// produced.
#[derive(Debug)]
pub struct Channel {
    /// Serialized outbound messages
    pub outbound: mpsc::Sender<String>,
    /// Inbound events in arrival order
    pub inbound: mpsc::Receiver<TransportEvent>,
    reader: Option<JoinHandle<()>>,
}

impl Channel {
    /// Assemble a channel from its halves and the task reading the socket
    #[must_use]
    pub const fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            reader,
        }
    }

    /// Split into writer, reader, and a closer for the reading task
    #[must_use]
    pub fn split(self) -> (mpsc::Sender<String>, mpsc::Receiver<TransportEvent>, ChannelCloser) {
        (
            self.outbound,
            self.inbound,
            ChannelCloser {
                reader: self.reader,
            },
        )
    }

    /// Close the channel immediately
    pub fn close(self) {
        let (_, _, closer) = self.split();
        closer.close();
    }
}

/// Stops the task reading a channel
#[derive(Debug, Default)]
pub struct ChannelCloser {
    reader: Option<JoinHandle<()>>,
}

impl ChannelCloser {
    /// Abort the reader
    pub fn close(self) {
        if let Some(reader) = self.reader {
            reader.abort();
        }
    }
}

/// Opens channels to the voice agent
#[async_trait]
pub trait Connector: Send + Sync {
    /// Exchange credentials and open a channel
    ///
    /// # Errors
    ///
    /// Returns error if credentials are rejected or the handshake fails
    async fn connect(&self, config: &ConnectionConfig) -> Result<Channel>;
}
