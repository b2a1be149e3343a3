//! Client side of a realtime claim discussion.
//!
//! A [`ClaimSession`] owns one socket.io [`Channel`] scoped to a claim, the
//! [`MessageSync`] timeline fed by it, the [`SummaryRegistry`] of claim
//! summary watchers, and the HTTP [`BootstrapClient`] used before and
//! alongside the channel. Uploads go through [`Uploader`] over the same
//! channel.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod session;
pub mod sync;
pub mod transport;
pub mod upload;
pub mod watch;

pub use bootstrap::{BootstrapClient, BootstrapError, TransactionAttributes};
pub use config::ClientConfig;
pub use error::ClientError;
pub use handlers::{HandlerId, HandlerSet, Subscription};
pub use session::ClaimSession;
pub use sync::{
    DeliveryState, DuplicatePolicy, Message, MessageId, MessageSync, Role, SendError,
};
pub use transport::mock::{MockConnector, MockPeer, MockPeers};
pub use transport::websocket::SocketIoConnector;
pub use transport::{
    Channel, ChannelError, ChannelState, ConnectOutcome, ConnectRequest, Connector, EventSink,
    Link, LinkCommand, LinkEvent,
};
pub use upload::{
    ChunkSource, DiskFile, InMemoryFile, UploadError, UploadJob, UploadReport, Uploader,
};
pub use watch::SummaryRegistry;

pub use chargeback_proto as proto;
