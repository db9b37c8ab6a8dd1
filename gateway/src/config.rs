//! Process configuration from environment variables. Anything malformed
//! here is fatal at startup; inconsistent settlement descriptors are only
//! warned about, later, by the bootstrap service.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use primitive_types::U256;
use relay_events::ChainId;
use relay_events::Keys;
use relay_events::PeerInfo;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tollgate_node::bootstrap;
use tollgate_node::bootstrap::KnownPeer;
use tollgate_node::config::SettlementConfig;
use tollgate_node::pricing::PricingPolicy;

pub const DEFAULT_HTTP_PORT: u16 = 3100;
pub const DEFAULT_RELAY_WS_PORT: u16 = 7100;
pub const DEFAULT_BASE_PRICE_PER_BYTE: u64 = 10;
pub const DEFAULT_DATA_DIR: &str = "/data";

pub struct GatewayConfig {
    pub node_id: String,
    pub keys: Keys,
    pub ilp_address: String,
    pub btp_endpoint: String,
    pub http_endpoint: Option<String>,
    pub asset_code: String,
    pub asset_scale: u32,
    pub http_port: u16,
    pub relay_ws_port: u16,
    pub data_dir: PathBuf,
    pub owner_pubkey: Option<String>,
    pub pricing: PricingPolicy,
    pub settlement: SettlementConfig,
    pub known_peers: Vec<KnownPeer>,
    /// Extra seed peers for this run, handed to `bootstrap()` verbatim.
    pub additional_peers_json: Option<String>,
    pub runtime_url: String,
    pub admin_url: String,
    pub admin_auth_token: Option<String>,
    pub channel_service_url: Option<String>,
    pub directory_url: Option<String>,
    pub btp_secret: Option<String>,
    pub announce_to_peers: bool,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let node_id = get("NODE_ID").unwrap_or_else(|| "tollgate".to_string());

        let secret_key = get("NODE_SECRET_KEY").context("NODE_SECRET_KEY is not set")?;
        if secret_key.len() != 64 {
            bail!("NODE_SECRET_KEY must be 64 hex characters");
        }
        let keys = Keys::parse(&secret_key).context("NODE_SECRET_KEY is not a valid key")?;

        let ilp_address = get("ILP_ADDRESS").context("ILP_ADDRESS is not set")?;
        validate_ilp_address(&ilp_address)?;

        let btp_endpoint = get("BTP_ENDPOINT").context("BTP_ENDPOINT is not set")?;

        let owner_pubkey = get("OWNER_PUBKEY")
            .map(|pubkey| {
                validate_pubkey(&pubkey).context("OWNER_PUBKEY is not a valid pubkey")?;
                Ok::<_, anyhow::Error>(pubkey)
            })
            .transpose()?;

        let pricing = PricingPolicy {
            base_price_per_byte: parse_amount_or(
                get("BASE_PRICE_PER_BYTE"),
                "BASE_PRICE_PER_BYTE",
                U256::from(DEFAULT_BASE_PRICE_PER_BYTE),
            )?,
            kind_overrides: parse_kind_prices(get("KIND_PRICES"))?,
            request_floor: get("SPSP_MIN_PRICE")
                .map(|value| {
                    U256::from_dec_str(&value)
                        .with_context(|| format!("SPSP_MIN_PRICE `{value}` is not an amount"))
                })
                .transpose()?,
        };

        let settlement = parse_settlement(&get)?;

        let known_peers = get("KNOWN_PEERS")
            .map(|json| bootstrap::parse_additional_peers(&json).context("KNOWN_PEERS"))
            .transpose()?
            .unwrap_or_default();

        let additional_peers_json = get("ADDITIONAL_PEERS");
        if let Some(json) = &additional_peers_json {
            bootstrap::parse_additional_peers(json).context("ADDITIONAL_PEERS")?;
        }

        Ok(GatewayConfig {
            node_id,
            keys,
            ilp_address,
            btp_endpoint,
            http_endpoint: get("HTTP_ENDPOINT"),
            asset_code: get("ASSET_CODE").unwrap_or_else(|| "USD".to_string()),
            asset_scale: parse_or(get("ASSET_SCALE"), "ASSET_SCALE", 9)?,
            http_port: parse_or(get("HTTP_PORT"), "HTTP_PORT", DEFAULT_HTTP_PORT)?,
            relay_ws_port: parse_or(get("RELAY_WS_PORT"), "RELAY_WS_PORT", DEFAULT_RELAY_WS_PORT)?,
            data_dir: PathBuf::from(
                get("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            owner_pubkey,
            pricing,
            settlement,
            known_peers,
            additional_peers_json,
            runtime_url: get("RUNTIME_URL").unwrap_or_else(|| "http://127.0.0.1:7770".to_string()),
            admin_url: get("CONNECTOR_ADMIN_URL")
                .unwrap_or_else(|| "http://127.0.0.1:7769".to_string()),
            admin_auth_token: get("CONNECTOR_ADMIN_TOKEN"),
            channel_service_url: get("CHANNEL_SERVICE_URL"),
            directory_url: get("DIRECTORY_URL"),
            btp_secret: get("BTP_SECRET"),
            announce_to_peers: parse_or(get("ANNOUNCE_TO_PEERS"), "ANNOUNCE_TO_PEERS", true)?,
        })
    }

    /// The advertisement this node publishes about itself.
    pub fn local_peer_info(&self) -> PeerInfo {
        let mut info = PeerInfo::new(
            self.keys.public_key_hex(),
            self.ilp_address.clone(),
            self.btp_endpoint.clone(),
            self.asset_code.clone(),
            self.asset_scale,
        );
        info.http_endpoint = self.http_endpoint.clone();
        info.supported_chains = self.settlement.supported_chains.clone();
        info.settlement_addresses = self.settlement.settlement_addresses.clone();
        if !self.settlement.preferred_tokens.is_empty() {
            info.preferred_tokens = Some(self.settlement.preferred_tokens.clone());
        }
        if !self.settlement.token_networks.is_empty() {
            info.token_networks = Some(self.settlement.token_networks.clone());
        }
        info
    }
}

fn parse_settlement(get: &impl Fn(&str) -> Option<String>) -> Result<SettlementConfig> {
    let supported_chains = get("SUPPORTED_CHAINS")
        .map(|list| {
            list.split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| {
                    entry
                        .trim()
                        .parse::<ChainId>()
                        .with_context(|| format!("SUPPORTED_CHAINS entry `{entry}`"))
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let mut settlement = SettlementConfig {
        supported_chains,
        settlement_addresses: parse_chain_map(get("SETTLEMENT_ADDRESSES"), "SETTLEMENT_ADDRESSES")?,
        preferred_tokens: parse_chain_map(get("PREFERRED_TOKENS"), "PREFERRED_TOKENS")?,
        token_networks: parse_chain_map(get("TOKEN_NETWORKS"), "TOKEN_NETWORKS")?,
        ..Default::default()
    };

    if let Some(deposit) = get("INITIAL_DEPOSIT") {
        U256::from_dec_str(&deposit)
            .with_context(|| format!("INITIAL_DEPOSIT `{deposit}` is not an amount"))?;
        settlement.initial_deposit = Some(deposit);
    }
    if let Some(timeout) = get("SETTLEMENT_TIMEOUT") {
        let timeout: u64 = timeout.parse().context("SETTLEMENT_TIMEOUT")?;
        if timeout == 0 {
            bail!("SETTLEMENT_TIMEOUT must be positive");
        }
        settlement.settlement_timeout_secs = timeout;
    }
    if let Some(secs) = get("CHANNEL_OPEN_TIMEOUT_SECS") {
        settlement.channel_open_timeout =
            Duration::from_secs(secs.parse().context("CHANNEL_OPEN_TIMEOUT_SECS")?);
    }
    if let Some(millis) = get("POLL_INTERVAL_MS") {
        settlement.poll_interval =
            Duration::from_millis(millis.parse().context("POLL_INTERVAL_MS")?);
    }

    Ok(settlement)
}

fn parse_chain_map(value: Option<String>, name: &str) -> Result<HashMap<ChainId, String>> {
    value
        .map(|json| {
            serde_json::from_str(&json).with_context(|| format!("{name} is not a chain map"))
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

fn parse_kind_prices(value: Option<String>) -> Result<HashMap<u32, U256>> {
    let Some(json) = value else {
        return Ok(HashMap::new());
    };

    let raw: HashMap<String, String> =
        serde_json::from_str(&json).context("KIND_PRICES is not a map")?;

    raw.into_iter()
        .map(|(kind, price)| {
            let kind: u32 = kind
                .parse()
                .with_context(|| format!("KIND_PRICES kind `{kind}`"))?;
            let price = U256::from_dec_str(&price)
                .with_context(|| format!("KIND_PRICES price `{price}`"))?;
            Ok((kind, price))
        })
        .collect()
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.parse().with_context(|| format!("{name} `{v}`")))
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

fn parse_amount_or(value: Option<String>, name: &str, default: U256) -> Result<U256> {
    value
        .map(|v| U256::from_dec_str(&v).with_context(|| format!("{name} `{v}` is not an amount")))
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

/// `g.` followed by alphanumerics, dots and hyphens.
fn validate_ilp_address(address: &str) -> Result<()> {
    let rest = address
        .strip_prefix("g.")
        .with_context(|| format!("ILP_ADDRESS `{address}` must start with `g.`"))?;

    if rest.is_empty()
        || !rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        bail!("ILP_ADDRESS `{address}` contains invalid characters");
    }

    Ok(())
}

/// 64 lowercase hex characters.
fn validate_pubkey(pubkey: &str) -> Result<()> {
    if pubkey.len() != 64
        || !pubkey
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        bail!("pubkey `{pubkey}` must be 64 lowercase hex characters");
    }
    Ok(())
}
