use crate::bootstrap::BootstrapClients;
use crate::bootstrap::BootstrapConfig;
use crate::bootstrap::BootstrapEvent;
use crate::bootstrap::BootstrapEventHub;
use crate::bootstrap::BootstrapPhase;
use crate::bootstrap::BootstrapService;
use crate::bootstrap::KnownPeer;
use crate::bootstrap::NodeStatus;
use crate::bootstrap::PeerOutcome;
use crate::clients::AddPeerRequest;
use crate::clients::AdminError;
use crate::clients::ChannelHandle;
use crate::clients::ChannelServiceClient;
use crate::clients::ChannelState;
use crate::clients::ChannelStatus;
use crate::clients::ClientError;
use crate::clients::ConnectorAdminClient;
use crate::clients::OpenChannelRequest;
use crate::clients::OutgoingPacket;
use crate::clients::PacketReply;
use crate::clients::RuntimeClient;
use crate::config::SettlementConfig;
use crate::handler::PacketHandler;
use crate::handler::PacketHandlerConfig;
use crate::handler::SettlementWiring;
use crate::monitor::RelayMonitor;
use crate::packet::Packet;
use crate::packet::PacketOutcome;
use crate::packet::RejectCode;
use crate::pricing::PricingPolicy;
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use parking_lot::Mutex;
use primitive_types::U256;
use relay_events::codec;
use relay_events::kind::PEER_INFO_KIND;
use relay_events::kind::REQUEST_KIND;
use relay_events::Event;
use relay_events::JsonTransportCodec;
use relay_events::Keys;
use relay_events::PeerInfo;
use relay_events::SettlementOffer;
use relay_events::SettlementResponse;
use relay_events::TransportCodec;
use relay_store::Filter;
use relay_store::RelayStore;
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

fn init_tracing() {
    static TRACING_TEST_SUBSCRIBER: Once = Once::new();

    TRACING_TEST_SUBSCRIBER.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("debug,hyper=warn,reqwest=warn")
            .with_test_writer()
            .init()
    })
}

const BASE: &str = "evm:base:8453";

fn chain(s: &str) -> relay_events::ChainId {
    s.parse().unwrap()
}

/// Channel service double: `open_channel` hands out `0xCH`, polls walk a
/// scripted status sequence whose last entry repeats.
struct MockChannelService {
    open_calls: AtomicU32,
    poll_calls: AtomicU32,
    handle_status: ChannelStatus,
    states: Mutex<Vec<ChannelStatus>>,
}

impl MockChannelService {
    fn new(handle_status: ChannelStatus, states: Vec<ChannelStatus>) -> Arc<Self> {
        Arc::new(MockChannelService {
            open_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
            handle_status,
            states: Mutex::new(states),
        })
    }

    fn rpc_count(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst) + self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelServiceClient for MockChannelService {
    async fn open_channel(
        &self,
        _request: OpenChannelRequest,
    ) -> Result<ChannelHandle, ClientError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChannelHandle {
            channel_id: "0xCH".to_string(),
            status: self.handle_status,
        })
    }

    async fn get_channel_state(&self, channel_id: &str) -> Result<ChannelState, ClientError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let mut states = self.states.lock();
        let status = if states.len() > 1 {
            states.remove(0)
        } else {
            states[0]
        };
        Ok(ChannelState {
            channel_id: channel_id.to_string(),
            status,
            chain: Some(chain(BASE)),
        })
    }
}

#[derive(Default)]
struct MockAdmin {
    added: Mutex<Vec<AddPeerRequest>>,
    removed: Mutex<Vec<String>>,
}

#[async_trait]
impl ConnectorAdminClient for MockAdmin {
    async fn add_peer(&self, request: AddPeerRequest) -> Result<(), AdminError> {
        self.added.lock().push(request);
        Ok(())
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<(), AdminError> {
        self.removed.lock().push(peer_id.to_string());
        Ok(())
    }
}

type ReplyFn = Box<dyn Fn(&OutgoingPacket) -> Result<PacketReply, ClientError> + Send + Sync>;

/// Runtime double; the reply closure plays the remote node.
struct MockRuntime {
    sent: Mutex<Vec<OutgoingPacket>>,
    reply: ReplyFn,
    delay: Option<Duration>,
}

impl MockRuntime {
    fn new(reply: ReplyFn) -> Arc<Self> {
        Arc::new(MockRuntime {
            sent: Mutex::new(Vec::new()),
            reply,
            delay: None,
        })
    }

    fn slow(reply: ReplyFn, delay: Duration) -> Arc<Self> {
        Arc::new(MockRuntime {
            sent: Mutex::new(Vec::new()),
            reply,
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn send_ilp_packet(&self, packet: OutgoingPacket) -> Result<PacketReply, ClientError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = (self.reply)(&packet);
        self.sent.lock().push(packet);
        reply
    }
}

/// A reply closure acting as a well-behaved remote responder: decrypts the
/// request and answers with a settlement response, optionally announcing
/// an opened channel.
fn responder(remote: Keys, channel_id: Option<String>) -> ReplyFn {
    let transport = JsonTransportCodec;

    Box::new(move |packet: &OutgoingPacket| {
        let event = transport
            .decode(&packet.data)
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        if event.kind != REQUEST_KIND {
            // Announcements and other writes are simply accepted.
            return Ok(PacketReply {
                accepted: true,
                ..Default::default()
            });
        }

        let request = codec::parse_request(&event, &remote, &event.pubkey)
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        let mut response = SettlementResponse::base(
            request.request_id,
            "g.remote.spsp.0123456789abcdef",
            general_purpose::STANDARD.encode([7u8; 32]),
        );
        if let Some(id) = &channel_id {
            response.negotiated_chain = Some(chain(BASE));
            response.settlement_address = Some("0xPEER".to_string());
            response.channel_id = Some(id.clone());
            response.settlement_timeout = Some(86_400);
        }

        let response_event =
            codec::build_response(&response, &event.pubkey, &remote, Some(&event.id))
                .map_err(|e| ClientError::Malformed(e.to_string()))?;
        let data = transport
            .encode(&response_event)
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        Ok(PacketReply {
            accepted: true,
            fulfillment: Some(vec![0u8; 32]),
            data: Some(data),
            ..Default::default()
        })
    })
}

fn local_settlement_config() -> SettlementConfig {
    SettlementConfig {
        supported_chains: vec![chain(BASE)],
        settlement_addresses: HashMap::from([(chain(BASE), "0xOWN".to_string())]),
        poll_interval: Duration::from_millis(1),
        channel_open_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

struct HandlerHarness {
    node_keys: Keys,
    handler: PacketHandler,
    store: Arc<RelayStore>,
    admin: Arc<MockAdmin>,
    events: BootstrapEventHub,
    status: Arc<NodeStatus>,
}

fn handler_harness(
    pricing: PricingPolicy,
    settlement: Option<SettlementConfig>,
    channels: Arc<MockChannelService>,
    owner_pubkey: Option<String>,
) -> HandlerHarness {
    init_tracing();

    let node_keys = Keys::generate();
    let store = Arc::new(RelayStore::new());
    let admin = Arc::new(MockAdmin::default());
    let events = BootstrapEventHub::new();
    let status = Arc::new(NodeStatus::new());

    let wiring = settlement.map(|config| SettlementWiring {
        config,
        channels: channels.clone() as Arc<dyn ChannelServiceClient>,
    });

    let handler = PacketHandler::new(
        node_keys.clone(),
        PacketHandlerConfig {
            ilp_address: "g.x".to_string(),
            owner_pubkey,
            packet_deadline: Duration::from_secs(5),
        },
        pricing,
        Arc::new(JsonTransportCodec),
        store.clone(),
        wiring,
        Some(admin.clone() as Arc<dyn ConnectorAdminClient>),
        events.clone(),
        status.clone(),
    );

    HandlerHarness {
        node_keys,
        handler,
        store,
        admin,
        events,
        status,
    }
}

fn request_packet(harness: &HandlerHarness, sender: &Keys, offer: SettlementOffer) -> (Packet, String) {
    let built = codec::build_request(
        &harness.node_keys.public_key_hex(),
        sender,
        Some(offer),
    )
    .unwrap();
    let data = JsonTransportCodec.encode(&built.event).unwrap();
    let amount = PricingPolicy::per_byte(10)
        .price(data.len(), REQUEST_KIND)
        .to_string();

    (
        Packet {
            amount,
            destination: "g.x".to_string(),
            data,
            source_account: None,
        },
        built.request_id,
    )
}

fn parse_accept_response(
    outcome: &PacketOutcome,
    requester: &Keys,
    responder_pubkey: &str,
) -> SettlementResponse {
    let PacketOutcome::Accept { data: Some(data), .. } = outcome else {
        panic!("expected accept with piggy-backed data, got {outcome:?}");
    };
    let event = JsonTransportCodec.decode(data).unwrap();
    codec::parse_response(&event, requester, responder_pubkey).unwrap()
}

// --- Packet handler ---

#[tokio::test]
async fn request_without_chains_gets_base_response_and_no_channel_rpc() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let harness = handler_harness(
        PricingPolicy::per_byte(10),
        Some(SettlementConfig::default()),
        channels.clone(),
        None,
    );
    let requester = Keys::generate();

    let (packet, request_id) = request_packet(&harness, &requester, SettlementOffer::default());
    let outcome = harness.handler.handle(packet).await;

    let response = parse_accept_response(
        &outcome,
        &requester,
        &harness.node_keys.public_key_hex(),
    );

    assert_eq!(response.request_id, request_id);
    assert!(response.destination_account.starts_with("g.x.spsp."));
    let suffix = response.destination_account.rsplit('.').next().unwrap();
    assert_eq!(suffix.len(), 16);

    let secret = general_purpose::STANDARD
        .decode(&response.shared_secret)
        .unwrap();
    assert_eq!(secret.len(), 32);

    assert_eq!(response.negotiated_chain, None);
    assert_eq!(response.channel_id, None);
    assert_eq!(channels.rpc_count(), 0);

    let PacketOutcome::Accept { fulfillment, .. } = outcome else {
        unreachable!()
    };
    assert_eq!(fulfillment, Some([0u8; 32]));
}

#[tokio::test]
async fn request_with_mutual_chain_opens_channel() {
    let channels = MockChannelService::new(
        ChannelStatus::Opening,
        vec![ChannelStatus::Opening, ChannelStatus::Open],
    );
    let harness = handler_harness(
        PricingPolicy::per_byte(10),
        Some(local_settlement_config()),
        channels.clone(),
        None,
    );
    let requester = Keys::generate();
    let mut events = harness.events.subscribe();

    let offer = SettlementOffer {
        supported_chains: vec![chain(BASE)],
        settlement_addresses: HashMap::from([(chain(BASE), "0xPEER".to_string())]),
        ..Default::default()
    };
    let (packet, _) = request_packet(&harness, &requester, offer);
    let outcome = harness.handler.handle(packet).await;

    let response = parse_accept_response(
        &outcome,
        &requester,
        &harness.node_keys.public_key_hex(),
    );

    assert_eq!(response.negotiated_chain, Some(chain(BASE)));
    assert_eq!(response.settlement_address.as_deref(), Some("0xOWN"));
    assert_eq!(response.channel_id.as_deref(), Some("0xCH"));
    assert_eq!(response.settlement_timeout, Some(86_400));

    // The sender was registered as a routable peer, best-effort.
    assert_eq!(harness.admin.added.lock().len(), 1);
    assert_eq!(
        harness.admin.added.lock()[0].id,
        requester.public_key_hex()
    );

    let mut channel_opened = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, BootstrapEvent::ChannelOpened { .. }) {
            channel_opened += 1;
        }
    }
    assert_eq!(channel_opened, 1);
    assert_eq!(harness.status.channel_count(), 1);
}

#[tokio::test]
async fn underpaid_request_is_rejected_with_metadata() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let harness = handler_harness(
        PricingPolicy::per_byte(10),
        Some(local_settlement_config()),
        channels.clone(),
        None,
    );
    let requester = Keys::generate();

    let (mut packet, _) = request_packet(&harness, &requester, SettlementOffer::default());
    let price = U256::from_dec_str(&packet.amount).unwrap();
    packet.amount = (price - U256::one()).to_string();

    let outcome = harness.handler.handle(packet).await;

    let PacketOutcome::Reject(reject) = outcome else {
        panic!("expected reject");
    };
    assert_eq!(reject.code, RejectCode::InsufficientAmount);
    assert_eq!(reject.required.as_deref(), Some(price.to_string().as_str()));
    assert_eq!(
        reject.received.as_deref(),
        Some((price - U256::one()).to_string().as_str())
    );
    assert_eq!(channels.rpc_count(), 0);
}

#[tokio::test]
async fn free_discovery_floor_accepts_zero_amount() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let mut pricing = PricingPolicy::per_byte(10);
    pricing.request_floor = Some(U256::zero());
    let harness = handler_harness(pricing, None, channels, None);
    let requester = Keys::generate();

    let (mut packet, _) = request_packet(&harness, &requester, SettlementOffer::default());
    packet.amount = "0".to_string();

    let outcome = harness.handler.handle(packet).await;

    assert!(outcome.is_accept(), "{outcome:?}");
}

#[tokio::test]
async fn undecryptable_request_is_a_bad_request() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let harness = handler_harness(
        PricingPolicy::per_byte(10),
        Some(local_settlement_config()),
        channels.clone(),
        None,
    );
    let requester = Keys::generate();

    // Encrypted to a third party, so our secret cannot decrypt it.
    let unrelated = Keys::generate();
    let built =
        codec::build_request(&unrelated.public_key_hex(), &requester, None).unwrap();
    let data = JsonTransportCodec.encode(&built.event).unwrap();
    let amount = PricingPolicy::per_byte(10)
        .price(data.len(), REQUEST_KIND)
        .to_string();

    let outcome = harness
        .handler
        .handle(Packet {
            amount,
            destination: "g.x".to_string(),
            data,
            source_account: None,
        })
        .await;

    let PacketOutcome::Reject(reject) = outcome else {
        panic!("expected reject");
    };
    assert_eq!(reject.code, RejectCode::BadRequest);
    assert!(reject.message.contains("decryption failed"), "{}", reject.message);
    assert_eq!(channels.rpc_count(), 0);
}

#[tokio::test]
async fn channel_open_timeout_is_an_internal_error() {
    let channels =
        MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Opening]);
    let harness = handler_harness(
        PricingPolicy::per_byte(10),
        Some(local_settlement_config()),
        channels,
        None,
    );
    let requester = Keys::generate();

    let offer = SettlementOffer {
        supported_chains: vec![chain(BASE)],
        settlement_addresses: HashMap::from([(chain(BASE), "0xPEER".to_string())]),
        ..Default::default()
    };
    let (packet, _) = request_packet(&harness, &requester, offer);
    let outcome = harness.handler.handle(packet).await;

    let PacketOutcome::Reject(reject) = outcome else {
        panic!("expected reject");
    };
    assert_eq!(reject.code, RejectCode::InternalError);
    assert!(reject.message.contains("channel"), "{}", reject.message);
    assert!(reject.message.contains("timeout"), "{}", reject.message);
}

#[tokio::test]
async fn owner_signed_event_is_stored_without_payment() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let owner = Keys::generate();
    let harness = handler_harness(
        PricingPolicy::per_byte(10),
        None,
        channels,
        Some(owner.public_key_hex()),
    );

    let event = Event::sign(1, Vec::new(), "owner note".to_string(), 1, &owner).unwrap();
    let data = JsonTransportCodec.encode(&event).unwrap();

    let outcome = harness
        .handler
        .handle(Packet {
            amount: "0".to_string(),
            destination: "g.x".to_string(),
            data,
            source_account: None,
        })
        .await;

    let PacketOutcome::Accept {
        fulfillment,
        data,
        event_id,
    } = outcome
    else {
        panic!("expected accept");
    };
    assert_eq!(fulfillment, None);
    assert_eq!(data, None);
    assert_eq!(event_id.as_deref(), Some(event.id.as_str()));
    assert!(harness.store.exists(&event.id));
}

#[tokio::test]
async fn stranger_paying_the_price_gets_stored() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let harness = handler_harness(PricingPolicy::per_byte(10), None, channels, None);
    let stranger = Keys::generate();

    let event = Event::sign(1, Vec::new(), "hello".to_string(), 1, &stranger).unwrap();
    let data = JsonTransportCodec.encode(&event).unwrap();
    let price = PricingPolicy::per_byte(10).price(data.len(), 1);

    let underpaid = harness
        .handler
        .handle(Packet {
            amount: (price - U256::one()).to_string(),
            destination: "g.x".to_string(),
            data: data.clone(),
            source_account: None,
        })
        .await;
    assert!(matches!(
        underpaid,
        PacketOutcome::Reject(ref r) if r.code == RejectCode::InsufficientAmount
    ));

    let paid = harness
        .handler
        .handle(Packet {
            amount: price.to_string(),
            destination: "g.x".to_string(),
            data,
            source_account: None,
        })
        .await;
    assert!(paid.is_accept());
    assert!(harness.store.exists(&event.id));
}

#[tokio::test]
async fn malformed_packets_are_bad_requests() {
    let channels = MockChannelService::new(ChannelStatus::Opening, vec![ChannelStatus::Open]);
    let harness = handler_harness(PricingPolicy::per_byte(10), None, channels, None);

    for packet in [
        Packet {
            amount: "not-a-number".to_string(),
            destination: "g.x".to_string(),
            data: vec![1],
            source_account: None,
        },
        Packet {
            amount: "10".to_string(),
            destination: String::new(),
            data: vec![1],
            source_account: None,
        },
        Packet {
            amount: "10".to_string(),
            destination: "g.x".to_string(),
            data: Vec::new(),
            source_account: None,
        },
        Packet {
            amount: "10".to_string(),
            destination: "g.x".to_string(),
            data: b"garbage".to_vec(),
            source_account: None,
        },
    ] {
        let outcome = harness.handler.handle(packet).await;
        assert!(matches!(
            outcome,
            PacketOutcome::Reject(ref r) if r.code == RejectCode::BadRequest
        ));
    }
}

// --- Bootstrap service ---

struct BootstrapHarness {
    service: Arc<BootstrapService>,
    store: Arc<RelayStore>,
    runtime: Arc<MockRuntime>,
    admin: Arc<MockAdmin>,
    status: Arc<NodeStatus>,
}

fn bootstrap_harness(
    keys: Keys,
    known_peers: Vec<KnownPeer>,
    runtime: Arc<MockRuntime>,
    channels: Option<Arc<MockChannelService>>,
) -> BootstrapHarness {
    init_tracing();

    let store = Arc::new(RelayStore::new());
    let admin = Arc::new(MockAdmin::default());
    let status = Arc::new(NodeStatus::new());
    let events = BootstrapEventHub::new();

    let local_info = PeerInfo::new(
        keys.public_key_hex(),
        "g.node",
        "btp+ws://node.example:7768",
        "USD",
        9,
    );

    let mut config = BootstrapConfig::new(local_info);
    config.known_peers = known_peers;
    config.settlement = local_settlement_config();
    config.pricing = PricingPolicy::per_byte(10);
    config.send_timeout = Duration::from_secs(1);

    let service = Arc::new(BootstrapService::new(
        keys,
        config,
        BootstrapClients {
            runtime: runtime.clone() as Arc<dyn RuntimeClient>,
            admin: admin.clone() as Arc<dyn ConnectorAdminClient>,
            channels: channels.map(|c| c as Arc<dyn ChannelServiceClient>),
            directory: None,
        },
        Arc::new(JsonTransportCodec),
        store.clone(),
        events,
        status.clone(),
    ));

    BootstrapHarness {
        service,
        store,
        runtime,
        admin,
        status,
    }
}

fn remote_peer(remote: &Keys) -> KnownPeer {
    KnownPeer {
        pubkey: remote.public_key_hex(),
        relay_url: "wss://remote.example".to_string(),
        ilp_address: Some("g.remote".to_string()),
        btp_endpoint: Some("btp+ws://remote.example:7768".to_string()),
    }
}

fn phases(events: &mut tokio::sync::broadcast::Receiver<BootstrapEvent>) -> Vec<BootstrapPhase> {
    let mut observed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BootstrapEvent::PhaseChanged { phase } = event {
            observed.push(phase);
        }
    }
    observed
}

#[tokio::test]
async fn genesis_node_announces_itself_to_the_local_store() {
    let keys = Keys::generate();
    let runtime = MockRuntime::new(Box::new(|_| {
        panic!("genesis bootstrap must not send packets")
    }));
    let harness = bootstrap_harness(keys.clone(), Vec::new(), runtime, None);
    let mut events = harness.service.events().subscribe();

    let results = harness.service.bootstrap(None).await.unwrap();

    assert!(results.is_empty());
    assert_eq!(
        phases(&mut events),
        vec![
            BootstrapPhase::Discovering,
            BootstrapPhase::Announcing,
            BootstrapPhase::Ready,
        ]
    );

    let announcements = harness.store.query(&Filter::kinds([PEER_INFO_KIND]));
    assert_eq!(announcements.len(), 1);
    assert_eq!(announcements[0].pubkey, keys.public_key_hex());

    assert_eq!(harness.status.peer_count(), 0);
    assert_eq!(harness.status.channel_count(), 0);
    assert_eq!(harness.status.phase(), BootstrapPhase::Ready);
}

#[tokio::test]
async fn full_handshake_registers_peer_and_awaits_channel() {
    let node_keys = Keys::generate();
    let remote = Keys::generate();
    let runtime = MockRuntime::new(responder(remote.clone(), Some("0xCH".to_string())));
    let channels = MockChannelService::new(
        ChannelStatus::Opening,
        vec![ChannelStatus::Opening, ChannelStatus::Open],
    );
    let harness = bootstrap_harness(
        node_keys,
        vec![remote_peer(&remote)],
        runtime,
        Some(channels),
    );
    let mut events = harness.service.events().subscribe();

    let results = harness.service.bootstrap(None).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0].outcome,
        PeerOutcome::Registered {
            channel_id: Some(ref id)
        } if id == "0xCH"
    ));

    assert_eq!(
        phases(&mut events),
        vec![
            BootstrapPhase::Discovering,
            BootstrapPhase::Handshaking,
            BootstrapPhase::Announcing,
            BootstrapPhase::Ready,
        ]
    );

    // Handshake request plus the announcement afterwards.
    assert_eq!(harness.runtime.sent.lock().len(), 2);

    let added = harness.admin.added.lock();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].id, remote.public_key_hex());
    assert_eq!(added[0].url, "btp+ws://remote.example:7768");
    assert_eq!(added[0].routes.len(), 1);
    assert_eq!(added[0].routes[0].prefix, "g.remote");

    assert_eq!(harness.status.peer_count(), 1);
    assert_eq!(harness.status.channel_count(), 1);
}

#[tokio::test]
async fn failed_handshake_does_not_abort_the_run() {
    let node_keys = Keys::generate();
    let good = Keys::generate();
    let bad = Keys::generate();

    let good_responder = responder(good.clone(), None);
    let bad_pubkey = bad.public_key_hex();
    let runtime = MockRuntime::new(Box::new(move |packet: &OutgoingPacket| {
        if packet.destination == "g.bad" {
            Err(ClientError::Network("connection refused".to_string()))
        } else {
            good_responder(packet)
        }
    }));

    let bad_peer = KnownPeer {
        pubkey: bad_pubkey,
        relay_url: "wss://bad.example".to_string(),
        ilp_address: Some("g.bad".to_string()),
        btp_endpoint: None,
    };
    let harness = bootstrap_harness(
        node_keys,
        vec![bad_peer, remote_peer(&good)],
        runtime,
        None,
    );
    let mut events = harness.service.events().subscribe();

    let results = harness.service.bootstrap(None).await.unwrap();

    assert_eq!(results.len(), 2);
    let registered = results
        .iter()
        .filter(|r| matches!(r.outcome, PeerOutcome::Registered { .. }))
        .count();
    assert_eq!(registered, 1);

    let mut saw_handshake_failed = false;
    while let Ok(event) = events.try_recv() {
        if let BootstrapEvent::HandshakeFailed { ref pubkey, .. } = event {
            assert_eq!(*pubkey, bad.public_key_hex());
            saw_handshake_failed = true;
        }
    }
    assert!(saw_handshake_failed);
    assert_eq!(harness.status.phase(), BootstrapPhase::Ready);
}

#[tokio::test]
async fn additional_peers_json_extends_the_seed_set() {
    let node_keys = Keys::generate();
    let remote = Keys::generate();
    let runtime = MockRuntime::new(responder(remote.clone(), None));
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    let json = format!(
        r#"[{{"pubkey": "{}", "relayUrl": "wss://remote.example", "ilpAddress": "g.remote"}}]"#,
        remote.public_key_hex()
    );
    let results = harness.service.bootstrap(Some(&json)).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0].outcome,
        PeerOutcome::Registered { channel_id: None }
    ));
}

#[tokio::test]
async fn malformed_additional_peers_json_fails_the_run() {
    let node_keys = Keys::generate();
    let runtime = MockRuntime::new(Box::new(|_| {
        Ok(PacketReply {
            accepted: true,
            ..Default::default()
        })
    }));
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    let result = harness.service.bootstrap(Some("{not json")).await;

    assert!(result.is_err());
    assert_eq!(harness.status.phase(), BootstrapPhase::Failed);
}

#[tokio::test]
async fn concurrent_bootstrap_runs_are_rejected() {
    let node_keys = Keys::generate();
    let remote = Keys::generate();
    let runtime = MockRuntime::slow(
        responder(remote.clone(), None),
        Duration::from_millis(300),
    );
    let harness = bootstrap_harness(node_keys, vec![remote_peer(&remote)], runtime, None);

    let service = harness.service.clone();
    let first = tokio::spawn(async move { service.bootstrap(None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = harness.service.bootstrap(None).await;
    assert!(second.is_err());

    first.await.unwrap().unwrap();
}

// --- Relay monitor ---

fn peer_info_event(remote: &Keys, ilp_address: &str) -> Event {
    let info = PeerInfo::new(
        remote.public_key_hex(),
        ilp_address,
        "btp+ws://remote.example:7768",
        "USD",
        9,
    );
    codec::build_peer_info(&info, remote).unwrap()
}

/// Like [`peer_info_event`] but with a chosen timestamp, so a test can
/// publish a strictly newer advertisement.
fn peer_info_event_at(remote: &Keys, ilp_address: &str, created_at: i64) -> Event {
    let info = PeerInfo::new(
        remote.public_key_hex(),
        ilp_address,
        "btp+ws://remote.example:7768",
        "USD",
        9,
    );
    Event::sign(
        PEER_INFO_KIND,
        Vec::new(),
        serde_json::to_string(&info).unwrap(),
        created_at,
        remote,
    )
    .unwrap()
}

async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn monitor_handshakes_newly_advertised_peers() {
    let node_keys = Keys::generate();
    let remote = Keys::generate();
    let runtime = MockRuntime::new(responder(remote.clone(), None));
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    let handle = RelayMonitor::new(harness.service.clone(), harness.store.clone(), []).start();

    harness.store.store(peer_info_event(&remote, "g.remote"));

    let admin = harness.admin.clone();
    wait_for(|| !admin.added.lock().is_empty(), "peer registration").await;
    assert_eq!(admin.added.lock()[0].id, remote.public_key_hex());

    handle.unsubscribe();
}

#[tokio::test]
async fn monitor_skips_ignored_pubkeys() {
    let node_keys = Keys::generate();
    let remote = Keys::generate();
    let runtime = MockRuntime::new(responder(remote.clone(), None));
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    let handle = RelayMonitor::new(
        harness.service.clone(),
        harness.store.clone(),
        [remote.public_key_hex()],
    )
    .start();

    harness.store.store(peer_info_event(&remote, "g.remote"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(harness.admin.added.lock().is_empty());
    assert!(harness.runtime.sent.lock().is_empty());

    handle.unsubscribe();
}

#[tokio::test]
async fn monitor_expands_follow_lists_from_stored_advertisements() {
    let node_keys = Keys::generate();
    let followed = Keys::generate();
    let follower = Keys::generate();
    let runtime = MockRuntime::new(responder(followed.clone(), None));
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    // The advertisement predates the monitor, so only the follow list can
    // surface this peer.
    harness.store.store(peer_info_event(&followed, "g.remote"));

    let handle = RelayMonitor::new(harness.service.clone(), harness.store.clone(), []).start();

    let follow = Event::sign(
        3,
        vec![vec!["p".to_string(), followed.public_key_hex()]],
        String::new(),
        100,
        &follower,
    )
    .unwrap();
    harness.store.store(follow);

    let admin = harness.admin.clone();
    wait_for(|| !admin.added.lock().is_empty(), "followed peer registration").await;
    assert_eq!(admin.added.lock()[0].id, followed.public_key_hex());

    handle.unsubscribe();
}

#[tokio::test]
async fn monitor_deregisters_peer_after_failed_refresh() {
    let node_keys = Keys::generate();
    let remote = Keys::generate();

    // First handshake succeeds; every later one finds the peer gone.
    let ok = responder(remote.clone(), None);
    let calls = Arc::new(AtomicU32::new(0));
    let runtime = {
        let calls = calls.clone();
        MockRuntime::new(Box::new(move |packet: &OutgoingPacket| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ok(packet)
            } else {
                Err(ClientError::Network("connection refused".to_string()))
            }
        }))
    };
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    let handle = RelayMonitor::new(harness.service.clone(), harness.store.clone(), []).start();

    harness
        .store
        .store(peer_info_event_at(&remote, "g.remote", 100));
    let admin = harness.admin.clone();
    wait_for(|| !admin.added.lock().is_empty(), "initial registration").await;

    harness
        .store
        .store(peer_info_event_at(&remote, "g.remote", 200));
    wait_for(|| !admin.removed.lock().is_empty(), "deregistration").await;
    assert_eq!(admin.removed.lock()[0], remote.public_key_hex());

    handle.unsubscribe();
}

#[tokio::test]
async fn monitor_caps_follow_candidates_per_event() {
    let node_keys = Keys::generate();
    let follower = Keys::generate();
    let peers: Vec<Keys> = (0..3).map(|_| Keys::generate()).collect();
    let runtime = MockRuntime::new(Box::new(|_| {
        Err(ClientError::Network("unreachable".to_string()))
    }));
    let harness = bootstrap_harness(node_keys, Vec::new(), runtime, None);

    for peer in &peers {
        harness.store.store(peer_info_event(peer, "g.remote"));
    }

    let handle = RelayMonitor::new(harness.service.clone(), harness.store.clone(), [])
        .with_max_follow_candidates(1)
        .start();

    let tags = peers
        .iter()
        .map(|p| vec!["p".to_string(), p.public_key_hex()])
        .collect();
    let follow = Event::sign(3, tags, String::new(), 100, &follower).unwrap();
    harness.store.store(follow);

    let runtime = harness.runtime.clone();
    wait_for(|| !runtime.sent.lock().is_empty(), "capped handshake attempt").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Only the first candidate was attempted.
    assert_eq!(harness.runtime.sent.lock().len(), 1);

    handle.unsubscribe();
}
