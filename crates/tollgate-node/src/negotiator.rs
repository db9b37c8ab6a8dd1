//! Picks a mutually supported settlement rail and drives the channel-open
//! state machine against the channel service.

use crate::clients::ChannelServiceClient;
use crate::clients::ChannelStatus;
use crate::clients::ClientError;
use crate::clients::OpenChannelRequest;
use crate::config::SettlementConfig;
use relay_events::ChainId;
use relay_events::SettlementRequest;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("channel service error: {0}")]
    Channel(#[from] ClientError),
    #[error("timeout waiting for channel {channel_id} to open")]
    OpenTimeout { channel_id: String },
    #[error("channel {channel_id} became {status:?} while waiting for open")]
    Terminal {
        channel_id: String,
        status: ChannelStatus,
    },
}

/// The result of a successful negotiation: everything the responder needs
/// to echo back to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub negotiated_chain: ChainId,
    /// The responder's own settlement address on the negotiated chain.
    pub settlement_address: String,
    pub token_address: Option<String>,
    pub token_network_address: Option<String>,
    pub channel_id: String,
    pub settlement_timeout: u64,
}

struct Candidate {
    chain: ChainId,
    local_address: String,
    peer_address: String,
    token: Option<String>,
    token_network: Option<String>,
}

/// Intersect the request's chains with ours, requester preference first,
/// and keep the first chain both sides can settle on. Returns `None` when
/// nothing matches; no RPC is issued in that case.
fn select_chain(request: &SettlementRequest, config: &SettlementConfig) -> Option<Candidate> {
    let mut considered: Vec<&ChainId> = Vec::new();

    for chain in &request.offer.supported_chains {
        if considered.contains(&chain) {
            continue;
        }
        considered.push(chain);

        if !config.supported_chains.contains(chain) {
            continue;
        }
        let Some(local_address) = config.settlement_addresses.get(chain) else {
            continue;
        };
        let Some(peer_address) = request.offer.settlement_addresses.get(chain) else {
            continue;
        };

        let peer_token = request
            .offer
            .preferred_tokens
            .as_ref()
            .and_then(|tokens| tokens.get(chain));
        let local_token = config.preferred_tokens.get(chain);
        let token = match (peer_token, local_token) {
            (Some(peer), Some(local)) if peer == local => Some(peer.clone()),
            (_, Some(local)) => Some(local.clone()),
            _ => None,
        };

        return Some(Candidate {
            chain: chain.clone(),
            local_address: local_address.clone(),
            peer_address: peer_address.clone(),
            token,
            token_network: config.token_networks.get(chain).cloned(),
        });
    }

    None
}

pub async fn negotiate(
    request: &SettlementRequest,
    config: &SettlementConfig,
    channel_client: &dyn ChannelServiceClient,
    sender_pubkey: &str,
) -> Result<Option<ChannelDescriptor>, NegotiationError> {
    if config.supported_chains.is_empty() {
        return Ok(None);
    }

    let Some(candidate) = select_chain(request, config) else {
        tracing::debug!(
            peer = %sender_pubkey,
            "No mutually supported settlement chain"
        );
        return Ok(None);
    };

    tracing::info!(
        peer = %sender_pubkey,
        chain = %candidate.chain,
        "Opening settlement channel"
    );

    let handle = channel_client
        .open_channel(OpenChannelRequest {
            peer_id: sender_pubkey.to_string(),
            chain: candidate.chain.clone(),
            token: candidate.token.clone(),
            token_network: candidate.token_network.clone(),
            peer_address: candidate.peer_address.clone(),
            initial_deposit: config.initial_deposit(),
            settlement_timeout: Some(config.settlement_timeout_secs),
        })
        .await?;

    if handle.status != ChannelStatus::Open {
        await_channel_open(
            channel_client,
            &handle.channel_id,
            config.channel_open_timeout,
            config.poll_interval,
        )
        .await?;
    }

    tracing::info!(
        peer = %sender_pubkey,
        chain = %candidate.chain,
        channel_id = %handle.channel_id,
        "Settlement channel open"
    );

    Ok(Some(ChannelDescriptor {
        negotiated_chain: candidate.chain,
        settlement_address: candidate.local_address,
        token_address: candidate.token,
        token_network_address: candidate.token_network,
        channel_id: handle.channel_id,
        settlement_timeout: config.settlement_timeout_secs,
    }))
}

/// Poll the channel service until the channel reports `open`, a terminal
/// status, or the wall-clock budget runs out.
pub async fn await_channel_open(
    channel_client: &dyn ChannelServiceClient,
    channel_id: &str,
    open_timeout: Duration,
    poll_interval: Duration,
) -> Result<(), NegotiationError> {
    let poll = async {
        loop {
            let state = channel_client.get_channel_state(channel_id).await?;

            match state.status {
                ChannelStatus::Open => return Ok(()),
                status if status.is_terminal() => {
                    return Err(NegotiationError::Terminal {
                        channel_id: channel_id.to_string(),
                        status,
                    });
                }
                _ => sleep(poll_interval).await,
            }
        }
    };

    timeout(open_timeout, poll)
        .await
        .map_err(|_| NegotiationError::OpenTimeout {
            channel_id: channel_id.to_string(),
        })?
}
