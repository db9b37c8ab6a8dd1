use crate::bootstrap::KnownPeer;
use crate::clients::ClientError;
use async_trait::async_trait;

/// Decentralised directory of bootstrap peers.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn lookup_peers(&self) -> Result<Vec<KnownPeer>, ClientError>;
}

pub struct HttpDirectoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpDirectoryClient {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn lookup_peers(&self) -> Result<Vec<KnownPeer>, ClientError> {
        let response = self
            .client
            .get(format!("{}/peers", self.base_url))
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
