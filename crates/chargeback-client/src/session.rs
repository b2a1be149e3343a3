use std::sync::Arc;

use chargeback_proto::{ClaimId, ClientEvent, InboundMessage, ServerError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapClient, TransactionAttributes};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::handlers::Subscription;
use crate::sync::{DuplicatePolicy, Message, MessageId, MessageSync};
use crate::transport::websocket::SocketIoConnector;
use crate::transport::{
    Channel, ChannelError, ChannelState, ConnectOutcome, ConnectRequest, Connector,
};
use crate::upload::{ChunkSource, UploadReport, Uploader};

/// One claim conversation: HTTP bootstrap, the claim channel, the message
/// timeline and the claim summary, all against one base URL.
pub struct ClaimSession {
    config: ClientConfig,
    bootstrap: BootstrapClient,
    channel: Channel,
    sync: Arc<MessageSync>,
    push_subscription: Mutex<Option<Subscription<InboundMessage>>>,
}

impl ClaimSession {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let connector: Arc<dyn Connector> = Arc::new(SocketIoConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let bootstrap = BootstrapClient::new(config.base_url())?;
        let channel = Channel::new(connector, config.handshake_timeout);
        Ok(Self {
            config,
            bootstrap,
            channel,
            sync: Arc::new(MessageSync::default()),
            push_subscription: Mutex::new(None),
        })
    }

    /// Swaps the timeline for an empty one using `policy`.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.sync = Arc::new(MessageSync::new(policy));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn bootstrap(&self) -> &BootstrapClient {
        &self.bootstrap
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn claim_id(&self) -> Option<ClaimId> {
        self.channel.claim_id()
    }

    pub async fn login(&self, uuid: Option<&str>) -> Result<String, ClientError> {
        Ok(self.bootstrap.login(uuid).await?)
    }

    pub async fn start_new_claim(
        &self,
        attributes: &TransactionAttributes,
    ) -> Result<ClaimId, ClientError> {
        Ok(self.bootstrap.start_new_claim(attributes).await?)
    }

    pub async fn connect(&self, claim_id: ClaimId) -> Result<ConnectOutcome, ClientError> {
        self.connect_with(ConnectRequest::new(claim_id)).await
    }

    /// Opens the claim channel. The timeline's push handler is attached
    /// before the handshake so nothing the server sends right after the
    /// acknowledgement is missed.
    pub async fn connect_with(&self, request: ConnectRequest) -> Result<ConnectOutcome, ClientError> {
        if self.channel.state() == ChannelState::Disconnected {
            let previous = self.push_subscription.lock().take();
            if let Some(previous) = previous {
                previous.unsubscribe();
            }
            let attached = self.sync.attach(&self.channel);
            *self.push_subscription.lock() = Some(attached);
        }

        match self.channel.connect_with(request).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.detach_sync();
                Err(err.into())
            }
        }
    }

    /// Closes the channel. Message handlers and summary watchers registered
    /// through this session are forgotten; the timeline itself is kept.
    pub fn disconnect(&self) {
        self.channel.disconnect();
        self.push_subscription.lock().take();
    }

    fn detach_sync(&self) {
        let attached = self.push_subscription.lock().take();
        if let Some(attached) = attached {
            attached.unsubscribe();
        }
    }

    /// Fetches the claim's history and replaces the timeline with it.
    pub async fn load_history(&self, claim_id: ClaimId) -> Result<usize, ClientError> {
        Ok(self.sync.load_history(&self.bootstrap, claim_id).await?)
    }

    /// Sends a user response on the open claim. On failure the optimistic
    /// entry is gone from the timeline by the time this returns.
    pub fn send_message(&self, text: impl Into<String>) -> Result<MessageId, ClientError> {
        // without a connection the emit fails and the entry is retracted
        let claim_id = self.channel.claim_id().unwrap_or_default();
        Ok(self.sync.send(&self.channel, claim_id, text)?)
    }

    pub fn timeline(&self) -> Vec<Message> {
        self.sync.timeline()
    }

    pub fn subscribe_timeline(&self) -> watch::Receiver<Vec<Message>> {
        self.sync.subscribe()
    }

    pub async fn upload_file<F>(&self, claim_id: ClaimId, file: &F) -> Result<UploadReport, ClientError>
    where
        F: ChunkSource + ?Sized,
    {
        self.upload_file_with_progress(claim_id, file, |_| {}).await
    }

    pub async fn upload_file_with_progress<F, P>(
        &self,
        claim_id: ClaimId,
        file: &F,
        on_progress: P,
    ) -> Result<UploadReport, ClientError>
    where
        F: ChunkSource + ?Sized,
        P: FnMut(f64) + Send,
    {
        let uploader = Uploader::new(&self.channel, self.config.chunk_bytes);
        Ok(uploader
            .upload_file_with_progress(claim_id, file, on_progress)
            .await?)
    }

    /// Pulls the claim summary over HTTP and notifies watchers with it.
    pub async fn fetch_structured_data(&self, claim_id: ClaimId) -> Result<Arc<Value>, ClientError> {
        Ok(self
            .channel
            .summaries()
            .refresh(&self.bootstrap, claim_id)
            .await?)
    }

    pub fn structured_data(&self) -> Arc<Value> {
        self.channel.summaries().snapshot()
    }

    pub fn add_watcher<F>(&self, watcher: F) -> Subscription<Value>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.channel.summaries().add_watcher(watcher)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription<InboundMessage>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.channel.on_message(handler)
    }

    pub fn on_server_error<F>(&self, handler: F) -> Subscription<ServerError>
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.channel.on_server_error(handler)
    }

    pub async fn get_merchant_view(&self, claim_id: ClaimId) -> Result<String, ClientError> {
        Ok(self.bootstrap.get_merchant_view(claim_id).await?)
    }

    /// Opens the channel for `claim_id` and announces the merchant side.
    /// Fails with [`ChannelError::ClaimMismatch`] when the channel is already
    /// open for a different claim.
    pub async fn connect_as_merchant(&self, claim_id: ClaimId) -> Result<ConnectOutcome, ClientError> {
        let outcome = self.connect(claim_id).await?;
        match self.channel.claim_id() {
            Some(open) if open == claim_id => {}
            Some(open) => {
                return Err(ChannelError::ClaimMismatch {
                    open,
                    requested: claim_id,
                }
                .into())
            }
            None => return Err(ChannelError::NotConnected.into()),
        }
        self.channel.emit(ClientEvent::MerchantConnect { claim_id })?;
        info!(target = "chargeback.session", claim_id = %claim_id, "joined as merchant");
        Ok(outcome)
    }

    pub fn send_merchant_response(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let claim_id = self.channel.claim_id().ok_or(ChannelError::NotConnected)?;
        let text = text.into();
        debug!(target = "chargeback.session", claim_id = %claim_id, chars = text.len(), "merchant response");
        self.channel
            .emit(ClientEvent::MerchantResponse { claim_id, text })?;
        Ok(())
    }
}
