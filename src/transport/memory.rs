//! In-memory transport for tests and offline demos
//!
//! Every successful connect hands a [`MemoryPeer`] to whoever awaits
//! [`MemoryConnector::next_peer`], which then plays the agent's side.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use super::{Channel, Connector, OUTBOUND_CAPACITY, TransportEvent};
use crate::config::ConnectionConfig;
use crate::{Error, Result};

/// How the next connect attempts behave
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectMode {
    /// Open immediately
    #[default]
    Accept,
    /// Fail with the given reason
    Fail(String),
    /// Never resolve
    Hang,
    /// Wait for [`MemoryConnector::release`], then open
    Gated,
}

struct Shared {
    mode: Mutex<ConnectMode>,
    attempts: AtomicUsize,
    gate: Notify,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

/// Scriptable [`Connector`] backed by tokio channels
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// Create a connector that accepts every attempt
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                mode: Mutex::new(ConnectMode::Accept),
                attempts: AtomicUsize::new(0),
                gate: Notify::new(),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Change how subsequent attempts behave
    pub fn set_mode(&self, mode: ConnectMode) {
        if let Ok(mut current) = self.shared.mode.lock() {
            *current = mode;
        }
    }

    /// Let one gated attempt through
    pub fn release(&self) {
        self.shared.gate.notify_one();
    }

    /// Number of connect attempts so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the agent side of the next opened channel
    pub async fn next_peer(&self) -> Option<MemoryPeer> {
        self.shared.peers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Channel> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let mode = self
            .shared
            .mode
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();

        match mode {
            ConnectMode::Accept => {}
            ConnectMode::Fail(reason) => return Err(Error::Connect(reason)),
            ConnectMode::Hang => std::future::pending::<()>().await,
            ConnectMode::Gated => self.shared.gate.notified().await,
        }

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let _ = in_tx.try_send(TransportEvent::Opened);

        let peer = MemoryPeer {
            to_client: in_tx,
            from_client: out_rx,
        };
        self.shared
            .peers_tx
            .send(peer)
            .map_err(|_| Error::Connect("memory connector dropped".to_string()))?;

        Ok(Channel::new(out_tx, in_rx, None))
    }
}

/// Agent side of an in-memory channel
pub struct MemoryPeer {
    to_client: mpsc::Sender<TransportEvent>,
    from_client: mpsc::Receiver<String>,
}

impl MemoryPeer {
    /// Deliver a raw text frame to the client
    pub async fn send_text(&self, text: &str) -> bool {
        self.to_client
            .send(TransportEvent::Message(text.to_string()))
            .await
            .is_ok()
    }

    /// Deliver a transport event to the client
    pub async fn send_event(&self, event: TransportEvent) -> bool {
        self.to_client.send(event).await.is_ok()
    }

    /// Close the channel from the agent side
    pub async fn close(&self, code: u16, reason: &str) -> bool {
        self.send_event(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        })
        .await
    }

    /// Next message the client sent, `None` once the client hung up
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Stop accepting client frames while still delivering events
    ///
    /// Sends from the client fail from here on.
    pub fn stop_receiving(&mut self) {
        self.from_client.close();
    }

    /// Next message the client sent, without waiting
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Check whether the client side still listens for events
    #[must_use]
    pub fn is_client_listening(&self) -> bool {
        !self.to_client.is_closed()
    }
}
