use chacha20poly1305::aead::Aead;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::KeyInit;
use chacha20poly1305::Nonce;
use hkdf::Hkdf;
use rand::thread_rng;
use rand::RngCore;
use secp256k1::ecdh::SharedSecret;
use secp256k1::KeyPair;
use secp256k1::Parity;
use secp256k1::PublicKey;
use secp256k1::SecretKey;
use secp256k1::XOnlyPublicKey;
use secp256k1::SECP256K1;
use sha2::Sha256;
use thiserror::Error;

/// Domain separator for the payload encryption key derivation.
const HKDF_INFO: &[u8] = b"settlement-payload-v1";

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("invalid public key `{0}`")]
    InvalidPublicKey(String),
    #[error("ciphertext is malformed")]
    MalformedCiphertext,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
}

/// The node's identity keys. Signing uses BIP-340 Schnorr over the x-only
/// public key; payload encryption uses ECDH against a peer's x-only key.
#[derive(Clone)]
pub struct Keys {
    secret_key: SecretKey,
    keypair: KeyPair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    /// Parse a 64-character lowercase hex secret key.
    pub fn parse(secret_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_key_hex)
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn generate() -> Self {
        let (secret_key, _) = SECP256K1.generate_keypair(&mut thread_rng());
        Self::from_secret_key(secret_key)
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let keypair = KeyPair::from_secret_key(SECP256K1, &secret_key);
        let (public_key, _parity) = XOnlyPublicKey::from_keypair(&keypair);

        Keys {
            secret_key,
            keypair,
            public_key,
        }
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        self.public_key
    }

    /// The peer identity as it appears on the wire.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

pub(crate) fn parse_x_only(pubkey_hex: &str) -> Result<XOnlyPublicKey, CryptoError> {
    let bytes = hex::decode(pubkey_hex)
        .map_err(|_| CryptoError::InvalidPublicKey(pubkey_hex.to_string()))?;
    XOnlyPublicKey::from_slice(&bytes)
        .map_err(|_| CryptoError::InvalidPublicKey(pubkey_hex.to_string()))
}

/// ECDH against the peer's key lifted at even parity, stretched through
/// HKDF-SHA256. Both directions of a conversation derive the same key.
fn conversation_key(local: &Keys, remote_pubkey_hex: &str) -> Result<[u8; 32], CryptoError> {
    let remote = parse_x_only(remote_pubkey_hex)?;
    let remote = PublicKey::from_x_only_public_key(remote, Parity::Even);
    let shared = SharedSecret::new(&remote, &local.secret_key);

    let hk = Hkdf::<Sha256>::new(None, &shared.secret_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .expect("32 bytes is a valid hkdf output length");

    Ok(key)
}

/// Encrypt `plaintext` so that only the holder of `recipient_pubkey_hex`
/// can read it. Wire form is base64(nonce || ciphertext).
pub fn encrypt_payload(
    sender: &Keys,
    recipient_pubkey_hex: &str,
    plaintext: &[u8],
) -> Result<String, CryptoError> {
    use base64::engine::general_purpose;
    use base64::Engine;

    let key = conversation_key(sender, recipient_pubkey_hex)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key).expect("key is 32 bytes");

    let mut nonce = [0u8; NONCE_LEN];
    thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(&nonce);
    wire.extend_from_slice(&ciphertext);

    Ok(general_purpose::STANDARD.encode(wire))
}

/// Inverse of [`encrypt_payload`], run by the recipient against the
/// sender's public key.
pub fn decrypt_payload(
    recipient: &Keys,
    sender_pubkey_hex: &str,
    payload: &str,
) -> Result<Vec<u8>, CryptoError> {
    use base64::engine::general_purpose;
    use base64::Engine;

    let wire = general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| CryptoError::MalformedCiphertext)?;
    if wire.len() < NONCE_LEN {
        return Err(CryptoError::MalformedCiphertext);
    }
    let (nonce, ciphertext) = wire.split_at(NONCE_LEN);

    let key = conversation_key(recipient, sender_pubkey_hex)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key).expect("key is 32 bytes");

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
