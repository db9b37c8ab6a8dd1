//! Brings the node from `init` to `ready`: assembles the peer set, runs
//! the settlement handshakes, registers peers with the packet router and
//! announces the node.

mod discovery;
mod event;
mod phase;
mod status;

pub use discovery::dedup_first_seen;
pub use discovery::parse_additional_peers;
pub use discovery::KnownPeer;
pub use event::BootstrapEvent;
pub use event::BootstrapEventHub;
pub use phase::BootstrapPhase;
pub use status::NodeStatus;

use crate::clients::AddPeerRequest;
use crate::clients::AdminError;
use crate::clients::ChannelServiceClient;
use crate::clients::ConnectorAdminClient;
use crate::clients::DirectoryClient;
use crate::clients::OutgoingPacket;
use crate::clients::PeerRoute;
use crate::clients::RuntimeClient;
use crate::config::SettlementConfig;
use crate::negotiator;
use crate::pricing::PricingPolicy;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use futures::StreamExt;
use relay_events::codec;
use relay_events::kind::PEER_INFO_KIND;
use relay_events::kind::REQUEST_KIND;
use relay_events::Keys;
use relay_events::PeerInfo;
use relay_events::TransportCodec;
use relay_store::RelayStore;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_HANDSHAKES: usize = 4;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BootstrapConfig {
    pub known_peers: Vec<KnownPeer>,
    /// The node's own advertisement.
    pub local_info: PeerInfo,
    pub settlement: SettlementConfig,
    /// Used to price outgoing requests and announcements at what the far
    /// end is likely to charge.
    pub pricing: PricingPolicy,
    pub directory_lookup: bool,
    pub btp_secret: Option<String>,
    /// Publish our advertisement to every successfully handshaken peer.
    pub announce_to_peers: bool,
    pub max_concurrent_handshakes: usize,
    pub send_timeout: Duration,
}

impl BootstrapConfig {
    pub fn new(local_info: PeerInfo) -> Self {
        BootstrapConfig {
            known_peers: Vec::new(),
            local_info,
            settlement: SettlementConfig::default(),
            pricing: PricingPolicy::default(),
            directory_lookup: false,
            btp_secret: None,
            announce_to_peers: true,
            max_concurrent_handshakes: DEFAULT_MAX_CONCURRENT_HANDSHAKES,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Every collaborator the service talks to, wired at construction time.
/// The optional ones are consulted in exactly one place each.
pub struct BootstrapClients {
    pub runtime: Arc<dyn RuntimeClient>,
    pub admin: Arc<dyn ConnectorAdminClient>,
    pub channels: Option<Arc<dyn ChannelServiceClient>>,
    pub directory: Option<Arc<dyn DirectoryClient>>,
}

#[derive(Debug, Clone)]
pub enum PeerOutcome {
    Registered { channel_id: Option<String> },
    Failed { reason: String },
}

/// Per-peer result of a bootstrap run.
#[derive(Debug, Clone)]
pub struct PeerResult {
    pub peer: KnownPeer,
    pub outcome: PeerOutcome,
}

pub struct BootstrapService {
    keys: Keys,
    config: BootstrapConfig,
    clients: BootstrapClients,
    transport: Arc<dyn TransportCodec>,
    store: Arc<RelayStore>,
    events: BootstrapEventHub,
    status: Arc<NodeStatus>,
    running: AtomicBool,
}

impl BootstrapService {
    pub fn new(
        keys: Keys,
        config: BootstrapConfig,
        clients: BootstrapClients,
        transport: Arc<dyn TransportCodec>,
        store: Arc<RelayStore>,
        events: BootstrapEventHub,
        status: Arc<NodeStatus>,
    ) -> Self {
        for warning in config.settlement.consistency_warnings() {
            tracing::warn!("Settlement configuration: {warning}");
        }

        BootstrapService {
            keys,
            config,
            clients,
            transport,
            store,
            events,
            status,
            running: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &BootstrapEventHub {
        &self.events
    }

    pub fn status(&self) -> Arc<NodeStatus> {
        self.status.clone()
    }

    pub fn local_pubkey(&self) -> String {
        self.keys.public_key_hex()
    }

    fn set_phase(&self, phase: BootstrapPhase) {
        if self.status.advance_phase(phase) {
            self.events.publish(BootstrapEvent::PhaseChanged { phase });
        }
    }

    /// Run the bootstrap lifecycle once. A second call while a run is in
    /// progress is rejected; per-peer failures never abort the run.
    pub async fn bootstrap(&self, additional_peers_json: Option<&str>) -> Result<Vec<PeerResult>> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("a bootstrap run is already in progress");
        }

        let result = self.run(additional_peers_json).await;
        self.running.store(false, Ordering::SeqCst);

        if result.is_err() {
            self.set_phase(BootstrapPhase::Failed);
        }

        result
    }

    async fn run(&self, additional_peers_json: Option<&str>) -> Result<Vec<PeerResult>> {
        self.set_phase(BootstrapPhase::Discovering);

        let mut sources = self.config.known_peers.clone();
        if let Some(json) = additional_peers_json {
            sources.extend(discovery::parse_additional_peers(json)?);
        }
        if self.config.directory_lookup {
            if let Some(directory) = &self.clients.directory {
                match directory.lookup_peers().await {
                    Ok(found) => {
                        tracing::info!(count = found.len(), "Resolved peers from directory");
                        sources.extend(found);
                    }
                    Err(e) => tracing::warn!("Directory lookup failed: {e:#}"),
                }
            }
        }

        let own_pubkey = self.keys.public_key_hex();
        let peers: Vec<KnownPeer> = discovery::dedup_first_seen(sources)
            .into_iter()
            .filter(|peer| peer.pubkey != own_pubkey)
            .collect();

        for peer in &peers {
            self.events.publish(BootstrapEvent::PeerDiscovered {
                pubkey: peer.pubkey.clone(),
            });
        }

        let results = if peers.is_empty() {
            Vec::new()
        } else {
            self.set_phase(BootstrapPhase::Handshaking);
            futures::stream::iter(peers)
                .map(|peer| async move {
                    let outcome = self.handshake_peer(&peer).await;
                    PeerResult { peer, outcome }
                })
                .buffer_unordered(self.config.max_concurrent_handshakes.max(1))
                .collect::<Vec<_>>()
                .await
        };

        self.set_phase(BootstrapPhase::Announcing);
        if results.is_empty() {
            // Nobody to talk to: this node seeds its own colony.
            self.announce_to_store()?;
        } else if self.config.announce_to_peers {
            self.announce_to_registered(&results).await;
        }

        self.set_phase(BootstrapPhase::Ready);
        self.events.publish(BootstrapEvent::Ready {
            peer_count: self.status.peer_count(),
            channel_count: self.status.channel_count(),
        });

        tracing::info!(
            peers = self.status.peer_count(),
            channels = self.status.channel_count(),
            "Bootstrap complete"
        );

        Ok(results)
    }

    /// The full handshake pipeline for one peer, also used by the relay
    /// monitor for peers discovered after the initial run.
    pub async fn handshake_peer(&self, peer: &KnownPeer) -> PeerOutcome {
        match self.try_handshake(peer).await {
            Ok(channel_id) => {
                self.status.record_peer();
                self.events.publish(BootstrapEvent::PeerRegistered {
                    pubkey: peer.pubkey.clone(),
                });
                tracing::info!(peer = %peer.pubkey, "Peer registered");
                PeerOutcome::Registered { channel_id }
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(peer = %peer.pubkey, "Handshake failed: {reason}");
                self.events.publish(BootstrapEvent::HandshakeFailed {
                    pubkey: peer.pubkey.clone(),
                    reason: reason.clone(),
                });
                PeerOutcome::Failed { reason }
            }
        }
    }

    async fn try_handshake(&self, peer: &KnownPeer) -> Result<Option<String>> {
        let destination = peer
            .ilp_address
            .clone()
            .context("No routing address known for peer")?;

        let offer = self
            .config
            .settlement
            .offer(&self.config.local_info.ilp_address);
        let built = codec::build_request(&peer.pubkey, &self.keys, Some(offer))?;
        let data = self.transport.encode(&built.event)?;
        let amount = self.config.pricing.price(data.len(), REQUEST_KIND);

        let reply = self
            .clients
            .runtime
            .send_ilp_packet(OutgoingPacket {
                destination: destination.clone(),
                amount: amount.to_string(),
                data,
                timeout: Some(self.config.send_timeout),
            })
            .await
            .context("Failed to send settlement request")?;

        if !reply.accepted {
            bail!(
                "settlement request rejected: {} {}",
                reply.code.unwrap_or_default(),
                reply.message.unwrap_or_default()
            );
        }

        let data = reply
            .data
            .context("Accept response carried no settlement response event")?;
        let response_event = self.transport.decode(&data)?;
        let response = codec::parse_response(&response_event, &self.keys, &peer.pubkey)?;
        if response.request_id != built.request_id {
            bail!(
                "response correlates to unknown request id {}",
                response.request_id
            );
        }

        let channel_id = match (&response.channel_id, &self.clients.channels) {
            (Some(id), Some(channels)) => {
                negotiator::await_channel_open(
                    channels.as_ref(),
                    id,
                    self.config.settlement.channel_open_timeout,
                    self.config.settlement.poll_interval,
                )
                .await?;
                self.status.record_channel();
                self.events.publish(BootstrapEvent::ChannelOpened {
                    pubkey: peer.pubkey.clone(),
                    channel_id: id.clone(),
                });
                Some(id.clone())
            }
            (Some(id), None) => {
                tracing::debug!(
                    peer = %peer.pubkey,
                    channel_id = %id,
                    "Peer opened a channel but no channel service is wired; not awaiting it"
                );
                Some(id.clone())
            }
            (None, _) => None,
        };

        let settlement = response.negotiated_chain.as_ref().map(|chain| {
            serde_json::json!({
                "chain": chain,
                "settlementAddress": response.settlement_address,
                "channelId": response.channel_id,
            })
        });

        let registration = AddPeerRequest {
            id: peer.pubkey.clone(),
            url: peer.registration_url(),
            auth_token: self.config.btp_secret.clone().unwrap_or_default(),
            routes: vec![PeerRoute {
                prefix: destination,
                priority: None,
            }],
            settlement,
        };

        match self.clients.admin.add_peer(registration).await {
            Ok(()) => {}
            Err(AdminError::PeerAlreadyExists) => {
                tracing::debug!(peer = %peer.pubkey, "Peer was already registered");
            }
            Err(e) => return Err(e).context("Failed to register peer with connector"),
        }

        Ok(channel_id)
    }

    /// Drop a peer's registration, e.g. after a failed refresh handshake.
    pub async fn deregister_peer(&self, pubkey: &str) -> Result<()> {
        match self.clients.admin.remove_peer(pubkey).await {
            Ok(()) | Err(AdminError::PeerNotFound) => {
                self.events.publish(BootstrapEvent::PeerDeregistered {
                    pubkey: pubkey.to_string(),
                });
                tracing::info!(peer = %pubkey, "Peer deregistered");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to deregister peer"),
        }
    }

    fn announce_to_store(&self) -> Result<()> {
        let event = codec::build_peer_info(&self.config.local_info, &self.keys)?;
        self.store.store(event);
        self.events.publish(BootstrapEvent::Announced { target: None });
        tracing::info!("Announced own peer info to the local relay");
        Ok(())
    }

    async fn announce_to_registered(&self, results: &[PeerResult]) {
        for result in results {
            if !matches!(result.outcome, PeerOutcome::Registered { .. }) {
                continue;
            }

            match self.announce_to_peer(&result.peer).await {
                Ok(()) => {
                    self.events.publish(BootstrapEvent::Announced {
                        target: Some(result.peer.pubkey.clone()),
                    });
                }
                Err(e) => {
                    tracing::warn!(peer = %result.peer.pubkey, "Announce failed: {e:#}");
                    self.events.publish(BootstrapEvent::AnnounceFailed {
                        target: result.peer.pubkey.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }
    }

    async fn announce_to_peer(&self, peer: &KnownPeer) -> Result<()> {
        let destination = peer
            .ilp_address
            .clone()
            .context("No routing address known for peer")?;

        let event = codec::build_peer_info(&self.config.local_info, &self.keys)?;
        let data = self.transport.encode(&event)?;
        let amount = self.config.pricing.price(data.len(), PEER_INFO_KIND);

        let reply = self
            .clients
            .runtime
            .send_ilp_packet(OutgoingPacket {
                destination,
                amount: amount.to_string(),
                data,
                timeout: Some(self.config.send_timeout),
            })
            .await
            .context("Failed to send announcement")?;

        if !reply.accepted {
            bail!(
                "announcement rejected: {} {}",
                reply.code.unwrap_or_default(),
                reply.message.unwrap_or_default()
            );
        }

        Ok(())
    }
}
