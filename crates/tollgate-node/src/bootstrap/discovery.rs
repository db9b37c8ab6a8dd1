use anyhow::Context;
use anyhow::Result;
use relay_events::PeerInfo;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;

/// A bootstrap seed entry: enough to find a peer and start a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownPeer {
    /// 32-byte x-only public key, lowercase hex.
    pub pubkey: String,
    /// The peer's relay websocket URL.
    pub relay_url: String,
    /// Routing address in the packet network, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilp_address: Option<String>,
    /// Packet transport endpoint, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btp_endpoint: Option<String>,
}

impl KnownPeer {
    /// The URL peers get registered under with the packet router.
    pub fn registration_url(&self) -> String {
        self.btp_endpoint
            .clone()
            .unwrap_or_else(|| self.relay_url.clone())
    }
}

impl From<&PeerInfo> for KnownPeer {
    fn from(info: &PeerInfo) -> Self {
        KnownPeer {
            pubkey: info.pubkey.clone(),
            relay_url: info.btp_endpoint.clone(),
            ilp_address: Some(info.ilp_address.clone()),
            btp_endpoint: Some(info.btp_endpoint.clone()),
        }
    }
}

/// Additional seed peers supplied as a JSON array string.
pub fn parse_additional_peers(json: &str) -> Result<Vec<KnownPeer>> {
    serde_json::from_str(json).context("Failed to parse additional peers JSON")
}

/// Union of all discovery sources, deduplicated by pubkey. The first-seen
/// entry wins, so seeds take precedence over later sources.
pub fn dedup_first_seen(sources: impl IntoIterator<Item = KnownPeer>) -> Vec<KnownPeer> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut peers = Vec::new();

    for peer in sources {
        if seen.insert(peer.pubkey.clone()) {
            peers.push(peer);
        }
    }

    peers
}
