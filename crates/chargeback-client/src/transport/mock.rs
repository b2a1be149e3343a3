//! In-memory connector for tests and offline demos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chargeback_proto::{ClientEvent, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChannelError, ConnectRequest, Connector, Link, LinkCommand, LinkEvent};

pub struct MockConnector {
    auto_acknowledge: bool,
    opens: AtomicUsize,
    fail_next: Mutex<Option<String>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

/// Receives the far end of every link the connector opens, in open order.
pub struct MockPeers {
    rx: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockPeers {
    pub async fn next(&mut self) -> Option<MockPeer> {
        self.rx.recv().await
    }
}

impl MockConnector {
    /// Links stay in the handshake until the test calls [`MockPeer::acknowledge`].
    pub fn manual() -> (Arc<Self>, MockPeers) {
        Self::build(false)
    }

    /// Links are acknowledged as soon as they open.
    pub fn auto_acknowledge() -> (Arc<Self>, MockPeers) {
        Self::build(true)
    }

    fn build(auto_acknowledge: bool) -> (Arc<Self>, MockPeers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            auto_acknowledge,
            opens: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
            peers: tx,
        });
        (connector, MockPeers { rx })
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Makes the next `open` fail before any link exists.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Link, ChannelError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let failure = self.fail_next.lock().take();
        if let Some(reason) = failure {
            return Err(ChannelError::HandshakeFailed(reason));
        }
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        if self.auto_acknowledge {
            let _ = event_tx.send(LinkEvent::Established);
        }
        let peer = MockPeer {
            request: request.clone(),
            commands: command_rx,
            events: event_tx,
        };
        let _ = self.peers.send(peer);
        Ok(Link {
            commands: command_tx,
            events: event_rx,
        })
    }
}

/// Server side of one mock link.
pub struct MockPeer {
    request: ConnectRequest,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl MockPeer {
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    pub fn acknowledge(&self) {
        let _ = self.events.send(LinkEvent::Established);
    }

    pub fn push(&self, event: ServerEvent) {
        let _ = self.events.send(LinkEvent::Event(event));
    }

    pub fn reject(&self, reason: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Rejected(reason.into()));
    }

    pub fn drop_connection(&self, reason: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Closed(Some(reason.into())));
    }

    pub async fn next_command(&mut self) -> Option<LinkCommand> {
        self.commands.recv().await
    }

    /// Emitted events received so far, without waiting.
    pub fn drain_emitted(&mut self) -> Vec<ClientEvent> {
        let mut emitted = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            if let LinkCommand::Emit(event) = command {
                emitted.push(event);
            }
        }
        emitted
    }
}
