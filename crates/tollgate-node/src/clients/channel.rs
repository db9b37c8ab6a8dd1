use crate::clients::ClientError;
use async_trait::async_trait;
use relay_events::ChainId;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Opening,
    Open,
    Closed,
    Failed,
}

impl ChannelStatus {
    /// A status the channel can never leave again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelStatus::Closed | ChannelStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChannelRequest {
    pub peer_id: String,
    pub chain: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_network: Option<String>,
    pub peer_address: String,
    /// Decimal string; defaults to `"0"`.
    pub initial_deposit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHandle {
    pub channel_id: String,
    pub status: ChannelStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    pub channel_id: String,
    pub status: ChannelStatus,
    pub chain: Option<ChainId>,
}

/// The local channel service that talks to blockchains on our behalf.
#[async_trait]
pub trait ChannelServiceClient: Send + Sync {
    async fn open_channel(&self, request: OpenChannelRequest)
        -> Result<ChannelHandle, ClientError>;

    async fn get_channel_state(&self, channel_id: &str) -> Result<ChannelState, ClientError>;
}

pub struct HttpChannelServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChannelServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpChannelServiceClient {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelServiceClient for HttpChannelServiceClient {
    async fn open_channel(
        &self,
        request: OpenChannelRequest,
    ) -> Result<ChannelHandle, ClientError> {
        let response = self
            .client
            .post(format!("{}/channels", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn get_channel_state(&self, channel_id: &str) -> Result<ChannelState, ClientError> {
        let response = self
            .client
            .get(format!("{}/channels/{channel_id}", self.base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
