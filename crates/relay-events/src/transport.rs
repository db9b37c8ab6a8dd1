use crate::event::Event;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("transport encoding failed: {0}")]
pub struct TransportError(String);

/// Bijective encoding of an event for transit inside a payment packet.
/// The packet handler is oblivious to the concrete format.
pub trait TransportCodec: Send + Sync {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, TransportError>;
    fn decode(&self, data: &[u8]) -> Result<Event, TransportError>;
}

/// Compact JSON, the node's default transit form.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTransportCodec;

impl TransportCodec for JsonTransportCodec {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(event).map_err(|e| TransportError(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Event, TransportError> {
        serde_json::from_slice(data).map_err(|e| TransportError(e.to_string()))
    }
}
