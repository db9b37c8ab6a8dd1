use anyhow::Context;
use anyhow::Result;
use gateway::cli::Opts;
use gateway::config::GatewayConfig;
use gateway::logger;
use gateway::routes;
use gateway::routes::AppState;
use relay_events::JsonTransportCodec;
use relay_store::RelayStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tollgate_node::bootstrap::BootstrapClients;
use tollgate_node::bootstrap::BootstrapConfig;
use tollgate_node::bootstrap::BootstrapEventHub;
use tollgate_node::bootstrap::BootstrapService;
use tollgate_node::bootstrap::NodeStatus;
use tollgate_node::bootstrap::PeerOutcome;
use tollgate_node::clients::ChannelServiceClient;
use tollgate_node::clients::ConnectorAdminClient;
use tollgate_node::clients::DirectoryClient;
use tollgate_node::clients::HttpChannelServiceClient;
use tollgate_node::clients::HttpConnectorAdminClient;
use tollgate_node::clients::HttpDirectoryClient;
use tollgate_node::clients::HttpRuntimeClient;
use tollgate_node::clients::RuntimeClient;
use tollgate_node::handler::PacketHandlerConfig;
use tollgate_node::handler::SettlementWiring;
use tollgate_node::handler::DEFAULT_PACKET_DEADLINE;
use tollgate_node::monitor::RelayMonitor;
use tollgate_node::PacketHandler;
use tracing::metadata::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::read();

    logger::init_tracing(LevelFilter::DEBUG, opts.json)?;

    let mut config = GatewayConfig::from_env().context("Failed to read configuration")?;
    if let Some(data_dir) = &opts.data_dir {
        config.data_dir = data_dir.clone();
    }

    if !config.data_dir.exists() {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Could not create data dir {}", config.data_dir.display())
        })?;
    }

    let http_address = opts
        .http_address
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.http_port)));

    let pubkey = config.keys.public_key_hex();
    tracing::info!(
        node_id = %config.node_id,
        %pubkey,
        ilp_address = %config.ilp_address,
        relay_ws_port = config.relay_ws_port,
        "Starting node"
    );

    let store = Arc::new(RelayStore::new());
    let transport = Arc::new(JsonTransportCodec);
    let status = Arc::new(NodeStatus::new());
    let events = BootstrapEventHub::new();

    let admin: Arc<dyn ConnectorAdminClient> = Arc::new(HttpConnectorAdminClient::new(
        config.admin_url.clone(),
        config.admin_auth_token.clone(),
    ));
    let runtime: Arc<dyn RuntimeClient> =
        Arc::new(HttpRuntimeClient::new(config.runtime_url.clone()));
    let channels: Option<Arc<dyn ChannelServiceClient>> = config
        .channel_service_url
        .as_ref()
        .map(|url| Arc::new(HttpChannelServiceClient::new(url.clone())) as _);
    let directory: Option<Arc<dyn DirectoryClient>> = config
        .directory_url
        .as_ref()
        .map(|url| Arc::new(HttpDirectoryClient::new(url.clone())) as _);

    let settlement_wiring = channels.clone().map(|channels| SettlementWiring {
        config: config.settlement.clone(),
        channels,
    });

    let handler = Arc::new(PacketHandler::new(
        config.keys.clone(),
        PacketHandlerConfig {
            ilp_address: config.ilp_address.clone(),
            owner_pubkey: config.owner_pubkey.clone(),
            packet_deadline: DEFAULT_PACKET_DEADLINE,
        },
        config.pricing.clone(),
        transport.clone(),
        store.clone(),
        settlement_wiring,
        Some(admin.clone()),
        events.clone(),
        status.clone(),
    ));

    let mut bootstrap_config = BootstrapConfig::new(config.local_peer_info());
    bootstrap_config.known_peers = config.known_peers.clone();
    bootstrap_config.settlement = config.settlement.clone();
    bootstrap_config.pricing = config.pricing.clone();
    bootstrap_config.directory_lookup = config.directory_url.is_some();
    bootstrap_config.btp_secret = config.btp_secret.clone();
    bootstrap_config.announce_to_peers = config.announce_to_peers;

    let service = Arc::new(BootstrapService::new(
        config.keys.clone(),
        bootstrap_config,
        BootstrapClients {
            runtime,
            admin,
            channels,
            directory,
        },
        transport,
        store.clone(),
        events,
        status.clone(),
    ));

    // Bootstrap and the follow-up monitor run next to the HTTP server; a
    // failed run leaves the node serving packets in the `failed` phase.
    let bootstrap_task = tokio::spawn({
        let service = service.clone();
        let store = store.clone();
        let additional_peers = config.additional_peers_json.clone();
        async move {
            match service.bootstrap(additional_peers.as_deref()).await {
                Ok(results) => {
                    let handled = results
                        .iter()
                        .filter(|result| {
                            matches!(result.outcome, PeerOutcome::Registered { .. })
                        })
                        .map(|result| result.peer.pubkey.clone());
                    let monitor = RelayMonitor::new(service, store, handled);
                    Some(monitor.start())
                }
                Err(e) => {
                    tracing::error!("Bootstrap failed: {e:#}");
                    None
                }
            }
        }
    });

    let state = Arc::new(AppState {
        handler,
        status,
        node_id: config.node_id.clone(),
        pubkey,
        ilp_address: config.ilp_address.clone(),
    });

    tracing::info!(%http_address, "Serving HTTP API");
    axum::Server::bind(&http_address)
        .serve(routes::router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    if let Ok(Some(monitor_handle)) = bootstrap_task.await {
        monitor_handle.unsubscribe();
    }

    Ok(())
}
