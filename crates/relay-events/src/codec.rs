//! Builders and parsers for the three wire events this node consumes or
//! emits. All structural validation lives here; the data structs stay
//! plain. The codec never touches the network.

use crate::chain::ChainId;
use crate::crypto;
use crate::crypto::CryptoError;
use crate::crypto::Keys;
use crate::event::Event;
use crate::event::EventError;
use crate::kind::PEER_INFO_KIND;
use crate::kind::REQUEST_KIND;
use crate::kind::RESPONSE_KIND;
use crate::peer_info::PeerInfo;
use crate::settlement::SettlementOffer;
use crate::settlement::SettlementRequest;
use crate::settlement::SettlementResponse;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InvalidEvent {
    #[error("unexpected event kind {actual}, expected {expected}")]
    WrongKind { expected: u32, actual: u32 },
    #[error("event envelope is not authentic: {0}")]
    Envelope(#[from] EventError),
    #[error("content is not a JSON object")]
    NotAnObject,
    #[error("malformed content: {0}")]
    Content(String),
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
    #[error("settlement address for chain `{0}` is not listed in supportedChains")]
    UnsupportedSettlementChain(String),
    #[error("decryption failed: {0}")]
    Decrypt(#[source] CryptoError),
    #[error("invalid key: {0}")]
    Key(#[source] CryptoError),
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Decode a JSON object out of (decrypted) event content.
fn decode_object<T: DeserializeOwned>(content: &[u8]) -> Result<T, InvalidEvent> {
    let value: serde_json::Value =
        serde_json::from_slice(content).map_err(|e| InvalidEvent::Content(e.to_string()))?;
    if !value.is_object() {
        return Err(InvalidEvent::NotAnObject);
    }

    serde_json::from_value(value).map_err(|e| InvalidEvent::Content(e.to_string()))
}

fn require_non_empty(value: &str, field: &'static str) -> Result<(), InvalidEvent> {
    if value.is_empty() {
        return Err(InvalidEvent::MissingField(field));
    }
    Ok(())
}

/// Every settlement address must belong to an advertised chain.
fn check_addresses_covered(
    supported: &[ChainId],
    addresses: &HashMap<ChainId, String>,
) -> Result<(), InvalidEvent> {
    for chain in addresses.keys() {
        if !supported.contains(chain) {
            return Err(InvalidEvent::UnsupportedSettlementChain(
                chain.as_str().to_string(),
            ));
        }
    }
    Ok(())
}

fn check_offer(offer: &SettlementOffer) -> Result<(), InvalidEvent> {
    check_addresses_covered(&offer.supported_chains, &offer.settlement_addresses)
}

/// Serialize `info` as compact JSON, sign it as a peer-info event. The
/// inverse of [`parse_peer_info`] up to default-filling of absent
/// collections.
pub fn build_peer_info(info: &PeerInfo, keys: &Keys) -> Result<Event, InvalidEvent> {
    require_non_empty(&info.ilp_address, "ilpAddress")?;
    require_non_empty(&info.btp_endpoint, "btpEndpoint")?;
    require_non_empty(&info.asset_code, "assetCode")?;
    check_addresses_covered(&info.supported_chains, &info.settlement_addresses)?;

    let content =
        serde_json::to_string(info).map_err(|e| InvalidEvent::Content(e.to_string()))?;

    Ok(Event::sign(
        PEER_INFO_KIND,
        Vec::new(),
        content,
        now_unix(),
        keys,
    )?)
}

pub fn parse_peer_info(event: &Event) -> Result<PeerInfo, InvalidEvent> {
    if event.kind != PEER_INFO_KIND {
        return Err(InvalidEvent::WrongKind {
            expected: PEER_INFO_KIND,
            actual: event.kind,
        });
    }
    event.verify()?;

    let mut info: PeerInfo = decode_object(event.content.as_bytes())?;

    require_non_empty(&info.ilp_address, "ilpAddress")?;
    require_non_empty(&info.btp_endpoint, "btpEndpoint")?;
    require_non_empty(&info.asset_code, "assetCode")?;
    check_addresses_covered(&info.supported_chains, &info.settlement_addresses)?;

    info.pubkey = event.pubkey.clone();

    Ok(info)
}

/// A freshly built settlement request, with the request id kept out-of-band
/// so the caller can correlate the eventual response.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub event: Event,
    pub request_id: String,
}

/// Encrypt a settlement request to `recipient_pubkey`. The envelope's
/// `created_at` equals the encrypted payload's timestamp.
pub fn build_request(
    recipient_pubkey: &str,
    sender: &Keys,
    offer: Option<SettlementOffer>,
) -> Result<BuiltRequest, InvalidEvent> {
    let offer = offer.unwrap_or_default();
    check_offer(&offer)?;

    let request_id = Uuid::new_v4().to_string();
    let timestamp = now_unix();
    let payload = SettlementRequest {
        request_id: request_id.clone(),
        timestamp,
        offer,
    };

    let plaintext =
        serde_json::to_vec(&payload).map_err(|e| InvalidEvent::Content(e.to_string()))?;
    let content = crypto::encrypt_payload(sender, recipient_pubkey, &plaintext)
        .map_err(InvalidEvent::Key)?;

    let event = Event::sign(
        REQUEST_KIND,
        vec![vec!["p".to_string(), recipient_pubkey.to_string()]],
        content,
        timestamp,
        sender,
    )?;

    Ok(BuiltRequest { event, request_id })
}

pub fn parse_request(
    event: &Event,
    recipient: &Keys,
    sender_pubkey: &str,
) -> Result<SettlementRequest, InvalidEvent> {
    if event.kind != REQUEST_KIND {
        return Err(InvalidEvent::WrongKind {
            expected: REQUEST_KIND,
            actual: event.kind,
        });
    }
    event.verify()?;

    let plaintext = crypto::decrypt_payload(recipient, sender_pubkey, &event.content)
        .map_err(InvalidEvent::Decrypt)?;

    let request: SettlementRequest = decode_object(&plaintext)?;

    require_non_empty(&request.request_id, "requestId")?;
    check_offer(&request.offer)?;

    Ok(request)
}

/// Encrypt a settlement response back to the original request sender.
pub fn build_response(
    payload: &SettlementResponse,
    original_sender_pubkey: &str,
    responder: &Keys,
    request_event_id: Option<&str>,
) -> Result<Event, InvalidEvent> {
    let plaintext =
        serde_json::to_vec(payload).map_err(|e| InvalidEvent::Content(e.to_string()))?;
    let content = crypto::encrypt_payload(responder, original_sender_pubkey, &plaintext)
        .map_err(InvalidEvent::Key)?;

    let mut tags = vec![vec!["p".to_string(), original_sender_pubkey.to_string()]];
    if let Some(id) = request_event_id {
        tags.push(vec!["e".to_string(), id.to_string()]);
    }

    Ok(Event::sign(RESPONSE_KIND, tags, content, now_unix(), responder)?)
}

pub fn parse_response(
    event: &Event,
    recipient: &Keys,
    responder_pubkey: &str,
) -> Result<SettlementResponse, InvalidEvent> {
    if event.kind != RESPONSE_KIND {
        return Err(InvalidEvent::WrongKind {
            expected: RESPONSE_KIND,
            actual: event.kind,
        });
    }
    event.verify()?;

    let plaintext = crypto::decrypt_payload(recipient, responder_pubkey, &event.content)
        .map_err(InvalidEvent::Decrypt)?;

    let response: SettlementResponse = decode_object(&plaintext)?;

    require_non_empty(&response.request_id, "requestId")?;
    require_non_empty(&response.destination_account, "destinationAccount")?;
    require_non_empty(&response.shared_secret, "sharedSecret")?;
    if response.settlement_timeout == Some(0) {
        return Err(InvalidEvent::InvalidField {
            field: "settlementTimeout",
            reason: "must be a positive integer".to_string(),
        });
    }

    Ok(response)
}
