use crate::crypto::parse_x_only;
use crate::crypto::Keys;
use crate::kind;
use secp256k1::schnorr::Signature;
use secp256k1::Message;
use secp256k1::SECP256K1;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("event id does not match its contents")]
    IdMismatch,
    #[error("event signature is invalid")]
    BadSignature,
    #[error("event pubkey is invalid")]
    BadPubkey,
}

/// The canonical signed-event envelope used on the relay. Immutable after
/// signing; all fields are public for (de)serialization but mutating a
/// signed event invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA-256 over the canonical serialization.
    pub id: String,
    /// 32-byte x-only public key of the author, lowercase hex.
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// 64-byte Schnorr signature over `id`, lowercase hex.
    pub sig: String,
}

impl Event {
    /// Build and sign an event with the given author keys.
    pub fn sign(
        kind: u32,
        tags: Vec<Vec<String>>,
        content: String,
        created_at: i64,
        keys: &Keys,
    ) -> Result<Event, EventError> {
        let pubkey = keys.public_key_hex();
        let id = Event::compute_id(&pubkey, created_at, kind, &tags, &content)?;

        let id_bytes: [u8; 32] = hex::decode(&id)
            .expect("id is valid hex")
            .try_into()
            .expect("sha256 output is 32 bytes");
        let message = Message::from_slice(&id_bytes).expect("32-byte digest");
        let sig = SECP256K1.sign_schnorr(&message, keys.keypair());

        Ok(Event {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: hex::encode(sig.as_ref()),
        })
    }

    /// The id is the SHA-256 of the compact JSON array
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(
        pubkey: &str,
        created_at: i64,
        kind: u32,
        tags: &[Vec<String>],
        content: &str,
    ) -> Result<String, EventError> {
        let canonical = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(digest))
    }

    /// Check that the id matches the contents and the signature matches
    /// the id. Parsers run this before trusting a received event.
    pub fn verify(&self) -> Result<(), EventError> {
        let expected = Event::compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if expected != self.id {
            return Err(EventError::IdMismatch);
        }

        let pubkey = parse_x_only(&self.pubkey).map_err(|_| EventError::BadPubkey)?;
        let id_bytes: [u8; 32] = hex::decode(&self.id)
            .map_err(|_| EventError::IdMismatch)?
            .try_into()
            .map_err(|_| EventError::IdMismatch)?;
        let message = Message::from_slice(&id_bytes).expect("32-byte digest");
        let sig_bytes = hex::decode(&self.sig).map_err(|_| EventError::BadSignature)?;
        let sig = Signature::from_slice(&sig_bytes).map_err(|_| EventError::BadSignature)?;

        SECP256K1
            .verify_schnorr(&sig, &message, &pubkey)
            .map_err(|_| EventError::BadSignature)
    }

    /// Values of all tags with the given name, e.g. every pubkey of a
    /// `p` tag.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(|t| t.as_str()) == Some(name))
            .filter_map(|tag| tag.get(1).map(|v| v.as_str()))
    }

    pub fn is_replaceable(&self) -> bool {
        kind::is_replaceable(self.kind)
    }

    pub fn is_ephemeral(&self) -> bool {
        kind::is_ephemeral(self.kind)
    }

    pub fn is_parameterized_replaceable(&self) -> bool {
        kind::is_parameterized_replaceable(self.kind)
    }

    /// The `d` tag value distinguishing parameterized-replaceable events.
    pub fn identifier(&self) -> Option<&str> {
        self.tag_values("d").next()
    }
}
