use crate::chain::ChainId;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// A peer's public advertisement, carried as compact JSON in the content
/// of a peer-info event. Validation happens in
/// [`crate::codec::parse_peer_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// The peer identity; filled from the signed envelope on parse, never
    /// serialized into the content.
    #[serde(skip, default)]
    pub pubkey: String,

    /// Routing address in the packet network, `g.`-prefixed.
    pub ilp_address: String,

    /// Websocket endpoint for the packet transport.
    pub btp_endpoint: String,

    /// Optional HTTP endpoint for direct packet delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_endpoint: Option<String>,

    pub asset_code: String,
    pub asset_scale: u32,

    /// Legacy free-form settlement-engine tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_engine: Option<String>,

    /// Supported chain rails, in preference order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_chains: Vec<ChainId>,

    /// Chain → on-chain settlement address. Every key must appear in
    /// `supported_chains`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settlement_addresses: HashMap<ChainId, String>,

    /// Chain → preferred token contract. Stays absent when not advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tokens: Option<HashMap<ChainId, String>>,

    /// Chain → token-network contract. Stays absent when not advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_networks: Option<HashMap<ChainId, String>>,
}

impl PeerInfo {
    pub fn new(
        pubkey: impl Into<String>,
        ilp_address: impl Into<String>,
        btp_endpoint: impl Into<String>,
        asset_code: impl Into<String>,
        asset_scale: u32,
    ) -> Self {
        PeerInfo {
            pubkey: pubkey.into(),
            ilp_address: ilp_address.into(),
            btp_endpoint: btp_endpoint.into(),
            http_endpoint: None,
            asset_code: asset_code.into(),
            asset_scale,
            settlement_engine: None,
            supported_chains: Vec::new(),
            settlement_addresses: HashMap::new(),
            preferred_tokens: None,
            token_networks: None,
        }
    }
}
