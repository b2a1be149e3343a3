use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::sync::SendError;
use crate::transport::ChannelError;
use crate::upload::UploadError;

/// Everything a [`crate::ClaimSession`] call can fail with.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Send(#[from] SendError),
}

impl ClientError {
    /// True when the call failed only because no channel was open.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            ClientError::Channel(ChannelError::NotConnected)
                | ClientError::Send(SendError {
                    source: ChannelError::NotConnected,
                    ..
                })
                | ClientError::Upload(UploadError::Channel {
                    source: ChannelError::NotConnected,
                    ..
                })
        )
    }
}
