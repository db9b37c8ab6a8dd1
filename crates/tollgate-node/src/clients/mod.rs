//! Clients for the external collaborators of this node: the channel
//! service, the connector admin API, the outbound packet runtime, and the
//! peer directory. Each is a trait so tests can swap in mocks.

pub mod admin;
pub mod backoff;
pub mod channel;
pub mod directory;
pub mod runtime;

pub use admin::AddPeerRequest;
pub use admin::AdminError;
pub use admin::ConnectorAdminClient;
pub use admin::HttpConnectorAdminClient;
pub use admin::PeerRoute;
pub use backoff::RetryPolicy;
pub use channel::ChannelHandle;
pub use channel::ChannelServiceClient;
pub use channel::ChannelState;
pub use channel::ChannelStatus;
pub use channel::HttpChannelServiceClient;
pub use channel::OpenChannelRequest;
pub use directory::DirectoryClient;
pub use directory::HttpDirectoryClient;
pub use runtime::HttpRuntimeClient;
pub use runtime::OutgoingPacket;
pub use runtime::PacketReply;
pub use runtime::RuntimeClient;

use thiserror::Error;

/// Failure talking to a remote facade. Only network-class errors are
/// eligible for retry.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("remote returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Malformed(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Timeout)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if let Some(status) = e.status() {
            ClientError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_decode() {
            ClientError::Malformed(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}
