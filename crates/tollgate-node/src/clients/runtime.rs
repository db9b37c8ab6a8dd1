use crate::clients::ClientError;
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// An outbound payment carrying one compact-encoded event.
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    pub destination: String,
    /// Unsigned amount as a decimal string.
    pub amount: String,
    pub data: Vec<u8>,
    pub timeout: Option<Duration>,
}

/// What the far end said about an outbound packet.
#[derive(Debug, Clone, Default)]
pub struct PacketReply {
    pub accepted: bool,
    pub fulfillment: Option<Vec<u8>>,
    pub data: Option<Vec<u8>>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// The runtime that owns the node's outbound credit links and actually
/// moves packets.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn send_ilp_packet(&self, packet: OutgoingPacket) -> Result<PacketReply, ClientError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendPacketBody {
    destination: String,
    amount: String,
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendPacketReply {
    accepted: bool,
    #[serde(default)]
    fulfillment: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpRuntimeClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRuntimeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpRuntimeClient {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RuntimeClient for HttpRuntimeClient {
    async fn send_ilp_packet(&self, packet: OutgoingPacket) -> Result<PacketReply, ClientError> {
        let body = SendPacketBody {
            destination: packet.destination,
            amount: packet.amount,
            data: general_purpose::STANDARD.encode(&packet.data),
            timeout_ms: packet.timeout.map(|t| t.as_millis() as u64),
        };

        let mut request = self
            .client
            .post(format!("{}/send-packet", self.base_url))
            .json(&body);
        if let Some(timeout) = packet.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let reply: SendPacketReply = response.json().await?;

        let decode = |field: Option<String>| -> Result<Option<Vec<u8>>, ClientError> {
            field
                .map(|value| {
                    general_purpose::STANDARD
                        .decode(value)
                        .map_err(|e| ClientError::Malformed(e.to_string()))
                })
                .transpose()
        };

        Ok(PacketReply {
            accepted: reply.accepted,
            fulfillment: decode(reply.fulfillment)?,
            data: decode(reply.data)?,
            code: reply.code,
            message: reply.message,
        })
    }
}
