use crate::clients::backoff;
use crate::clients::backoff::RetryPolicy;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Uniform error taxonomy of the connector admin API. Only network-class
/// errors are retried; a duplicate add is surfaced so callers can treat it
/// as success.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid peer payload: {0}")]
    Validation(String),
    #[error("admin credentials rejected")]
    Unauthorized,
    #[error("peer already exists")]
    PeerAlreadyExists,
    #[error("peer not found")]
    PeerNotFound,
    #[error("network error: {0}")]
    Network(String),
    #[error("admin server error {status}: {message}")]
    Server { status: u16, message: String },
}

impl AdminError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdminError::Network(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRoute {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPeerRequest {
    pub id: String,
    pub url: String,
    pub auth_token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<PeerRoute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<serde_json::Value>,
}

/// The packet router's admin surface. `add_peer` is idempotent on
/// identical payloads.
#[async_trait]
pub trait ConnectorAdminClient: Send + Sync {
    async fn add_peer(&self, request: AddPeerRequest) -> Result<(), AdminError>;

    async fn remove_peer(&self, peer_id: &str) -> Result<(), AdminError>;
}

pub struct HttpConnectorAdminClient {
    base_url: String,
    auth_token: Option<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl HttpConnectorAdminClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        HttpConnectorAdminClient {
            base_url: base_url.into(),
            auth_token,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    fn classify(status: u16, message: String) -> AdminError {
        match status {
            400 | 422 => AdminError::Validation(message),
            401 | 403 => AdminError::Unauthorized,
            404 => AdminError::PeerNotFound,
            409 => AdminError::PeerAlreadyExists,
            _ => AdminError::Server { status, message },
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<(), AdminError> {
        let request = match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| AdminError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(Self::classify(status.as_u16(), message))
    }
}

#[async_trait]
impl ConnectorAdminClient for HttpConnectorAdminClient {
    async fn add_peer(&self, request: AddPeerRequest) -> Result<(), AdminError> {
        backoff::retry(
            &self.retry,
            || {
                let builder = self
                    .client
                    .post(format!("{}/peers", self.base_url))
                    .json(&request);
                self.execute(builder)
            },
            AdminError::is_retryable,
        )
        .await
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<(), AdminError> {
        backoff::retry(
            &self.retry,
            || {
                let builder = self
                    .client
                    .delete(format!("{}/peers/{peer_id}", self.base_url));
                self.execute(builder)
            },
            AdminError::is_retryable,
        )
        .await
    }
}
