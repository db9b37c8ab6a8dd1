use primitive_types::U256;
use relay_events::kind::REQUEST_KIND;
use std::collections::HashMap;

/// The minimum acceptable payment for a write, derived from the event's
/// encoded byte length and kind.
#[derive(Debug, Clone, Default)]
pub struct PricingPolicy {
    pub base_price_per_byte: U256,
    /// Flat per-event prices that take precedence over the byte rate.
    pub kind_overrides: HashMap<u32, U256>,
    /// Explicit floor for settlement requests. `Some(0)` makes discovery
    /// free; `None` falls through to the base rate.
    pub request_floor: Option<U256>,
}

impl PricingPolicy {
    pub fn per_byte(base_price_per_byte: u64) -> Self {
        PricingPolicy {
            base_price_per_byte: U256::from(base_price_per_byte),
            kind_overrides: HashMap::new(),
            request_floor: None,
        }
    }

    pub fn price(&self, byte_len: usize, kind: u32) -> U256 {
        if let Some(price) = self.kind_overrides.get(&kind) {
            return *price;
        }

        if kind == REQUEST_KIND {
            if let Some(floor) = self.request_floor {
                return floor;
            }
        }

        U256::from(byte_len as u64)
            .checked_mul(self.base_price_per_byte)
            .unwrap_or(U256::MAX)
    }
}
