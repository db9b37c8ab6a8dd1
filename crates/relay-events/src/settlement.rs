use crate::chain::ChainId;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// The settlement descriptors a requester offers during a handshake. The
/// same block appears in peer advertisements; here every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOffer {
    /// The sender's routing address in the packet network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilp_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_engine: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_chains: Vec<ChainId>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settlement_addresses: HashMap<ChainId, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tokens: Option<HashMap<ChainId, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_networks: Option<HashMap<ChainId, String>>,
}

/// Plaintext of an encrypted settlement request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    /// Opaque unique id, echoed by the response.
    pub request_id: String,

    /// Seconds since epoch; equals the envelope's `created_at`.
    pub timestamp: i64,

    #[serde(flatten)]
    pub offer: SettlementOffer,
}

/// Plaintext of an encrypted settlement response event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub request_id: String,

    /// Per-payment routing identifier under the responder's address.
    pub destination_account: String,

    /// 32-byte shared secret, base64.
    pub shared_secret: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiated_chain: Option<ChainId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_network_address: Option<String>,

    /// Set when a channel was opened during negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    /// Positive seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_timeout: Option<u64>,
}

impl SettlementResponse {
    pub fn base(
        request_id: impl Into<String>,
        destination_account: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        SettlementResponse {
            request_id: request_id.into(),
            destination_account: destination_account.into(),
            shared_secret: shared_secret.into(),
            negotiated_chain: None,
            settlement_address: None,
            token_address: None,
            token_network_address: None,
            channel_id: None,
            settlement_timeout: None,
        }
    }
}
