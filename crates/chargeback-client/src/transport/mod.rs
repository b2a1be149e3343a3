use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chargeback_proto::{ClaimId, ClientEvent, InboundMessage, ServerError, ServerEvent};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::handlers::{HandlerSet, Subscription};
use crate::watch::SummaryRegistry;

pub mod frame;
pub mod mock;
pub mod websocket;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("not connected to server")]
    NotConnected,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("channel is open for claim {open}, not claim {requested}")]
    ClaimMismatch { open: ClaimId, requested: ClaimId },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Handshake parameters for one claim-scoped connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub claim_id: ClaimId,
    /// Optional transaction description the server reads at connect time.
    pub transaction_details: Option<Value>,
}

impl ConnectRequest {
    pub fn new(claim_id: ClaimId) -> Self {
        Self {
            claim_id,
            transaction_details: None,
        }
    }

    pub fn with_transaction_details(mut self, details: Value) -> Self {
        self.transaction_details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    Emit(ClientEvent),
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The far end acknowledged the namespace connect.
    Established,
    Event(ServerEvent),
    Rejected(String),
    Closed(Option<String>),
}

/// One open connection as seen by the channel: commands flow out, events in.
#[derive(Debug)]
pub struct Link {
    pub commands: mpsc::UnboundedSender<LinkCommand>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links. `open` returns once the connection attempt is in flight; the
/// acknowledgement arrives later as [`LinkEvent::Established`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: &ConnectRequest) -> Result<Link, ChannelError>;
}

/// Fire-and-forget outbound path shared by the synchronizer and uploader.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClientEvent) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Opened,
    /// A connection was already open or in progress; nothing was done.
    AlreadyOpen,
}

struct Inner {
    state: ChannelState,
    generation: u64,
    claim_id: Option<ClaimId>,
    commands: Option<mpsc::UnboundedSender<LinkCommand>>,
    reader: Option<JoinHandle<()>>,
}

impl Inner {
    fn release(&mut self) -> (Option<mpsc::UnboundedSender<LinkCommand>>, Option<JoinHandle<()>>) {
        self.state = ChannelState::Disconnected;
        self.claim_id = None;
        (self.commands.take(), self.reader.take())
    }
}

/// The single persistent connection for one claim.
pub struct Channel {
    connector: Arc<dyn Connector>,
    handshake_timeout: Option<Duration>,
    inner: Arc<Mutex<Inner>>,
    messages: Arc<HandlerSet<InboundMessage>>,
    server_errors: Arc<HandlerSet<ServerError>>,
    summaries: Arc<SummaryRegistry>,
}

impl Channel {
    pub fn new(connector: Arc<dyn Connector>, handshake_timeout: Option<Duration>) -> Self {
        Self {
            connector,
            handshake_timeout,
            inner: Arc::new(Mutex::new(Inner {
                state: ChannelState::Disconnected,
                generation: 0,
                claim_id: None,
                commands: None,
                reader: None,
            })),
            messages: HandlerSet::new(),
            server_errors: HandlerSet::new(),
            summaries: Arc::new(SummaryRegistry::new()),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Claim of the open (or opening) connection.
    pub fn claim_id(&self) -> Option<ClaimId> {
        self.inner.lock().claim_id
    }

    pub fn summaries(&self) -> &Arc<SummaryRegistry> {
        &self.summaries
    }

    pub async fn connect(&self, claim_id: ClaimId) -> Result<ConnectOutcome, ChannelError> {
        self.connect_with(ConnectRequest::new(claim_id)).await
    }

    /// Opens the connection and waits for the far end to acknowledge it.
    ///
    /// Calling this while a connection is open or still handshaking returns
    /// [`ConnectOutcome::AlreadyOpen`] without touching the transport.
    pub async fn connect_with(&self, request: ConnectRequest) -> Result<ConnectOutcome, ChannelError> {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state != ChannelState::Disconnected {
                debug!(
                    target = "chargeback.channel",
                    claim_id = %request.claim_id,
                    state = ?inner.state,
                    "connect ignored; channel already open"
                );
                return Ok(ConnectOutcome::AlreadyOpen);
            }
            inner.state = ChannelState::Connecting;
            inner.generation += 1;
            inner.claim_id = Some(request.claim_id);
            inner.generation
        };

        // one deadline covers both opening the link and the acknowledgement
        let deadline = self
            .handshake_timeout
            .map(|limit| (Instant::now() + limit, limit));

        let opened = match deadline {
            Some((at, limit)) => match tokio::time::timeout_at(at, self.connector.open(&request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(target = "chargeback.channel", claim_id = %request.claim_id, timeout = ?limit, "link did not open in time");
                    self.teardown(generation);
                    return Err(ChannelError::HandshakeTimeout(limit));
                }
            },
            None => self.connector.open(&request).await,
        };
        let link = match opened {
            Ok(link) => link,
            Err(err) => {
                warn!(target = "chargeback.channel", claim_id = %request.claim_id, error = %err, "failed to open link");
                self.teardown(generation);
                return Err(err);
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                let _ = link.commands.send(LinkCommand::Close);
                return Err(ChannelError::HandshakeFailed(
                    "disconnected while connecting".into(),
                ));
            }
            inner.commands = Some(link.commands);
            let reader = Reader {
                inner: Arc::clone(&self.inner),
                generation,
                messages: Arc::clone(&self.messages),
                server_errors: Arc::clone(&self.server_errors),
                summaries: Arc::clone(&self.summaries),
                ack: Some(ack_tx),
            };
            inner.reader = Some(tokio::spawn(reader.run(link.events)));
        }

        let acknowledged = match deadline {
            Some((at, limit)) => match tokio::time::timeout_at(at, ack_rx).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(target = "chargeback.channel", claim_id = %request.claim_id, timeout = ?limit, "handshake timed out");
                    self.teardown(generation);
                    return Err(ChannelError::HandshakeTimeout(limit));
                }
            },
            None => ack_rx.await,
        };

        match acknowledged {
            Ok(Ok(())) => {
                info!(target = "chargeback.channel", claim_id = %request.claim_id, "connected to server");
                Ok(ConnectOutcome::Opened)
            }
            Ok(Err(err)) => {
                self.teardown(generation);
                Err(err)
            }
            Err(_) => {
                self.teardown(generation);
                Err(ChannelError::HandshakeFailed(
                    "link closed before acknowledgement".into(),
                ))
            }
        }
    }

    /// Closes the connection and forgets every registered handler and watcher.
    /// Safe to call when already disconnected.
    pub fn disconnect(&self) {
        let (commands, reader, was) = {
            let mut inner = self.inner.lock();
            let was = inner.state;
            inner.generation += 1;
            let (commands, reader) = inner.release();
            (commands, reader, was)
        };
        if let Some(commands) = commands {
            let _ = commands.send(LinkCommand::Close);
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        self.messages.clear();
        self.server_errors.clear();
        self.summaries.clear_watchers();
        if was != ChannelState::Disconnected {
            info!(target = "chargeback.channel", "disconnected from server");
        }
    }

    pub fn emit(&self, event: ClientEvent) -> Result<(), ChannelError> {
        let inner = self.inner.lock();
        if inner.state != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }
        let commands = inner.commands.as_ref().ok_or(ChannelError::NotConnected)?;
        debug!(target = "chargeback.channel", event = event.name(), "emit");
        commands
            .send(LinkCommand::Emit(event))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Registers a handler for every inbound `message` push.
    pub fn on_message<F>(&self, handler: F) -> Subscription<InboundMessage>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.messages.add(handler)
    }

    pub fn on_server_error<F>(&self, handler: F) -> Subscription<ServerError>
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.server_errors.add(handler)
    }

    pub fn message_handler_count(&self) -> usize {
        self.messages.len()
    }

    fn teardown(&self, generation: u64) {
        let (commands, reader) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.release()
        };
        if let Some(commands) = commands {
            let _ = commands.send(LinkCommand::Close);
        }
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl EventSink for Channel {
    fn emit(&self, event: ClientEvent) -> Result<(), ChannelError> {
        Channel::emit(self, event)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let (commands, reader) = self.inner.lock().release();
        if let Some(commands) = commands {
            let _ = commands.send(LinkCommand::Close);
        }
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

/// Drains one link's inbound events. Owned by a spawned task; mutates the
/// channel state only while its generation is still current.
struct Reader {
    inner: Arc<Mutex<Inner>>,
    generation: u64,
    messages: Arc<HandlerSet<InboundMessage>>,
    server_errors: Arc<HandlerSet<ServerError>>,
    summaries: Arc<SummaryRegistry>,
    ack: Option<oneshot::Sender<Result<(), ChannelError>>>,
}

impl Reader {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Established => {
                    if self.mark_connected() {
                        if let Some(ack) = self.ack.take() {
                            let _ = ack.send(Ok(()));
                        }
                    }
                }
                LinkEvent::Event(ServerEvent::Message(message)) => {
                    let delivered = self.messages.dispatch(&message);
                    debug!(target = "chargeback.channel", handlers = delivered, "message push");
                }
                LinkEvent::Event(ServerEvent::UpdateClaimSummary(snapshot)) => {
                    self.summaries.publish(snapshot);
                }
                LinkEvent::Event(ServerEvent::Error(error)) => {
                    warn!(target = "chargeback.channel", message = %error.message, "server reported error");
                    self.server_errors.dispatch(&error);
                }
                LinkEvent::Rejected(reason) => {
                    warn!(target = "chargeback.channel", reason = %reason, "connection rejected");
                    self.finish(Some(reason));
                    return;
                }
                LinkEvent::Closed(reason) => {
                    self.finish(reason);
                    return;
                }
            }
        }
        self.finish(None);
    }

    fn mark_connected(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != self.generation {
            return false;
        }
        inner.state = ChannelState::Connected;
        true
    }

    fn finish(&mut self, reason: Option<String>) {
        if let Some(ack) = self.ack.take() {
            let detail = reason.unwrap_or_else(|| "link closed before acknowledgement".into());
            let _ = ack.send(Err(ChannelError::HandshakeFailed(detail)));
            // connect_with tears the link down itself
            return;
        }
        let mut inner = self.inner.lock();
        if inner.generation != self.generation {
            return;
        }
        inner.state = ChannelState::Disconnected;
        inner.claim_id = None;
        inner.commands = None;
        // our own handle; dropping it detaches the task we are running in
        inner.reader = None;
        info!(
            target = "chargeback.channel",
            reason = reason.as_deref().unwrap_or("transport closed"),
            "disconnected from server"
        );
    }
}
