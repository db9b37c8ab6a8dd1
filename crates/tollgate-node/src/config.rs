use relay_events::ChainId;
use relay_events::SettlementOffer;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_SETTLEMENT_TIMEOUT_SECS: u64 = 86_400;
pub const DEFAULT_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The node's own settlement posture: which rails it accepts and where it
/// settles on each of them.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Rails this node is willing to settle on, in local preference order.
    pub supported_chains: Vec<ChainId>,
    pub settlement_addresses: HashMap<ChainId, String>,
    pub preferred_tokens: HashMap<ChainId, String>,
    pub token_networks: HashMap<ChainId, String>,
    /// Decimal string; absent means `"0"`.
    pub initial_deposit: Option<String>,
    pub settlement_timeout_secs: u64,
    pub channel_open_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        SettlementConfig {
            supported_chains: Vec::new(),
            settlement_addresses: HashMap::new(),
            preferred_tokens: HashMap::new(),
            token_networks: HashMap::new(),
            initial_deposit: None,
            settlement_timeout_secs: DEFAULT_SETTLEMENT_TIMEOUT_SECS,
            channel_open_timeout: DEFAULT_CHANNEL_OPEN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SettlementConfig {
    /// Inconsistencies that are worth a warning at startup but do not stop
    /// the process: the affected chain is simply never negotiated.
    pub fn consistency_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for chain in &self.supported_chains {
            if !self.settlement_addresses.contains_key(chain) {
                warnings.push(format!(
                    "chain `{chain}` is listed as supported but has no settlement address"
                ));
            }
        }
        for chain in self.settlement_addresses.keys() {
            if !self.supported_chains.contains(chain) {
                warnings.push(format!(
                    "settlement address configured for `{chain}` which is not a supported chain"
                ));
            }
        }

        warnings
    }

    /// The descriptor block this node includes in outgoing settlement
    /// requests and advertisements.
    pub fn offer(&self, ilp_address: &str) -> SettlementOffer {
        SettlementOffer {
            ilp_address: Some(ilp_address.to_string()),
            settlement_engine: None,
            supported_chains: self.supported_chains.clone(),
            settlement_addresses: self.settlement_addresses.clone(),
            preferred_tokens: if self.preferred_tokens.is_empty() {
                None
            } else {
                Some(self.preferred_tokens.clone())
            },
            token_networks: if self.token_networks.is_empty() {
                None
            } else {
                Some(self.token_networks.clone())
            },
        }
    }

    pub fn initial_deposit(&self) -> String {
        self.initial_deposit
            .clone()
            .unwrap_or_else(|| "0".to_string())
    }
}
