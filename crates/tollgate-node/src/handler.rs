//! The business-logic server behind the packet endpoint: prices incoming
//! payments, validates event payloads, routes settlement requests through
//! the negotiator and returns accept/reject verdicts.

use crate::bootstrap::BootstrapEvent;
use crate::bootstrap::BootstrapEventHub;
use crate::bootstrap::NodeStatus;
use crate::clients::AddPeerRequest;
use crate::clients::AdminError;
use crate::clients::ChannelServiceClient;
use crate::clients::ConnectorAdminClient;
use crate::clients::PeerRoute;
use crate::config::SettlementConfig;
use crate::negotiator;
use crate::packet::Packet;
use crate::packet::PacketOutcome;
use crate::packet::Reject;
use crate::pricing::PricingPolicy;
use base64::engine::general_purpose;
use base64::Engine;
use primitive_types::U256;
use rand::thread_rng;
use rand::RngCore;
use relay_events::codec;
use relay_events::kind::REQUEST_KIND;
use relay_events::Event;
use relay_events::Keys;
use relay_events::SettlementResponse;
use relay_events::TransportCodec;
use relay_store::RelayStore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_PACKET_DEADLINE: Duration = Duration::from_secs(60);

/// Everything the settlement path needs; left unwired on nodes that only
/// sell storage.
pub struct SettlementWiring {
    pub config: SettlementConfig,
    pub channels: Arc<dyn ChannelServiceClient>,
}

pub struct PacketHandlerConfig {
    /// The node's own routing address; per-payment destinations are
    /// grafted under it.
    pub ilp_address: String,
    /// Events signed by this key are stored without payment.
    pub owner_pubkey: Option<String>,
    pub packet_deadline: Duration,
}

pub struct PacketHandler {
    keys: Keys,
    config: PacketHandlerConfig,
    pricing: PricingPolicy,
    transport: Arc<dyn TransportCodec>,
    store: Arc<RelayStore>,
    settlement: Option<SettlementWiring>,
    admin: Option<Arc<dyn ConnectorAdminClient>>,
    events: BootstrapEventHub,
    status: Arc<NodeStatus>,
}

impl PacketHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keys: Keys,
        config: PacketHandlerConfig,
        pricing: PricingPolicy,
        transport: Arc<dyn TransportCodec>,
        store: Arc<RelayStore>,
        settlement: Option<SettlementWiring>,
        admin: Option<Arc<dyn ConnectorAdminClient>>,
        events: BootstrapEventHub,
        status: Arc<NodeStatus>,
    ) -> Self {
        PacketHandler {
            keys,
            config,
            pricing,
            transport,
            store,
            settlement,
            admin,
            events,
            status,
        }
    }

    /// Handle one inbound packet. Never takes longer than the configured
    /// packet deadline; the response reflects all committed side effects.
    pub async fn handle(&self, packet: Packet) -> PacketOutcome {
        let outcome = match tokio::time::timeout(
            self.config.packet_deadline,
            self.handle_inner(packet),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => PacketOutcome::Reject(Reject::internal("packet deadline exceeded")),
        };

        match &outcome {
            PacketOutcome::Accept { event_id, .. } => {
                tracing::info!(event_id = ?event_id, "Accepted packet");
            }
            PacketOutcome::Reject(reject) => {
                tracing::warn!(
                    code = reject.code.as_str(),
                    message = %reject.message,
                    "Rejected packet"
                );
            }
        }

        outcome
    }

    async fn handle_inner(&self, packet: Packet) -> PacketOutcome {
        let amount = match validate_packet(&packet) {
            Ok(amount) => amount,
            Err(reject) => return PacketOutcome::Reject(reject),
        };

        let event = match self.decode_event(&packet.data) {
            Ok(event) => event,
            Err(reject) => return PacketOutcome::Reject(reject),
        };

        let price = self.pricing.price(packet.data.len(), event.kind);
        let owner_bypass = self
            .config
            .owner_pubkey
            .as_deref()
            .is_some_and(|owner| owner == event.pubkey);

        if !owner_bypass && amount < price {
            return PacketOutcome::Reject(Reject::insufficient_amount(price, amount));
        }

        if event.kind == REQUEST_KIND {
            self.handle_request(event).await
        } else {
            self.handle_store(event)
        }
    }

    fn decode_event(&self, data: &[u8]) -> Result<Event, Reject> {
        let event = self
            .transport
            .decode(data)
            .map_err(|e| Reject::bad_request(format!("undecodable event payload: {e}")))?;

        event
            .verify()
            .map_err(|e| Reject::bad_request(format!("event failed verification: {e}")))?;

        Ok(event)
    }

    /// The settlement-request path: decrypt, negotiate a rail when both
    /// sides advertise chains, reply with an encrypted response event.
    async fn handle_request(&self, event: Event) -> PacketOutcome {
        let request = match codec::parse_request(&event, &self.keys, &event.pubkey) {
            Ok(request) => request,
            Err(e) => {
                return PacketOutcome::Reject(Reject::bad_request(format!(
                    "invalid settlement request: {e}"
                )));
            }
        };

        let mut response = SettlementResponse::base(
            request.request_id.clone(),
            self.fresh_destination_account(),
            fresh_shared_secret(),
        );

        if let Some(wiring) = &self.settlement {
            if !request.offer.supported_chains.is_empty() {
                match negotiator::negotiate(
                    &request,
                    &wiring.config,
                    wiring.channels.as_ref(),
                    &event.pubkey,
                )
                .await
                {
                    Ok(Some(descriptor)) => {
                        response.negotiated_chain = Some(descriptor.negotiated_chain.clone());
                        response.settlement_address =
                            Some(descriptor.settlement_address.clone());
                        response.token_address = descriptor.token_address.clone();
                        response.token_network_address =
                            descriptor.token_network_address.clone();
                        response.channel_id = Some(descriptor.channel_id.clone());
                        response.settlement_timeout = Some(descriptor.settlement_timeout);

                        self.status.record_channel();
                        self.events.publish(BootstrapEvent::ChannelOpened {
                            pubkey: event.pubkey.clone(),
                            channel_id: descriptor.channel_id.clone(),
                        });

                        self.register_sender(&event.pubkey, &request.offer.ilp_address)
                            .await;
                    }
                    // No mutual chain: the requester still gets the base
                    // response and can pay per packet.
                    Ok(None) => {}
                    Err(e) => {
                        return PacketOutcome::Reject(Reject::internal(format!(
                            "settlement negotiation failed: {e}"
                        )));
                    }
                }
            }
        }

        let response_event =
            match codec::build_response(&response, &event.pubkey, &self.keys, Some(&event.id)) {
                Ok(response_event) => response_event,
                Err(e) => {
                    return PacketOutcome::Reject(Reject::internal(format!(
                        "failed to build settlement response: {e}"
                    )));
                }
            };

        let data = match self.transport.encode(&response_event) {
            Ok(data) => data,
            Err(e) => {
                return PacketOutcome::Reject(Reject::internal(format!(
                    "failed to encode settlement response: {e}"
                )));
            }
        };

        PacketOutcome::Accept {
            fulfillment: Some([0u8; 32]),
            data: Some(data),
            event_id: None,
        }
    }

    /// Paid write of any other event kind.
    fn handle_store(&self, event: Event) -> PacketOutcome {
        let event_id = event.id.clone();
        self.store.store(event);

        PacketOutcome::Accept {
            fulfillment: None,
            data: None,
            event_id: Some(event_id),
        }
    }

    /// Best-effort registration of the request sender as a routable peer.
    /// Failure is logged, never surfaced.
    async fn register_sender(&self, pubkey: &str, ilp_address: &Option<String>) {
        let Some(admin) = &self.admin else {
            return;
        };

        let routes = ilp_address
            .iter()
            .map(|prefix| PeerRoute {
                prefix: prefix.clone(),
                priority: None,
            })
            .collect();

        let registration = AddPeerRequest {
            id: pubkey.to_string(),
            url: String::new(),
            // The request event carries no transport credentials.
            auth_token: String::new(),
            routes,
            settlement: None,
        };

        match admin.add_peer(registration).await {
            Ok(()) => {
                self.status.record_peer();
                self.events.publish(BootstrapEvent::PeerRegistered {
                    pubkey: pubkey.to_string(),
                });
            }
            Err(AdminError::PeerAlreadyExists) => {
                tracing::debug!(peer = %pubkey, "Sender was already registered");
            }
            Err(e) => {
                tracing::warn!(peer = %pubkey, "Failed to register sender as peer: {e:#}");
            }
        }
    }

    fn fresh_destination_account(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}.spsp.{}", self.config.ilp_address, &suffix[..16])
    }
}

fn validate_packet(packet: &Packet) -> Result<U256, Reject> {
    if packet.destination.is_empty() {
        return Err(Reject::bad_request("packet has no destination"));
    }
    if packet.data.is_empty() {
        return Err(Reject::bad_request("packet carries no event data"));
    }

    U256::from_dec_str(&packet.amount)
        .map_err(|_| Reject::bad_request(format!("invalid amount `{}`", packet.amount)))
}

fn fresh_shared_secret() -> String {
    let mut secret = [0u8; 32];
    thread_rng().fill_bytes(&mut secret);
    general_purpose::STANDARD.encode(secret)
}
