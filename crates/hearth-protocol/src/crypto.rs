/// Per-peer message encryption for Hearth.
///
/// Box construction: static-static X25519 Diffie-Hellman, HKDF-SHA256
/// key derivation, XChaCha20-Poly1305 AEAD. The DH is symmetric, so a
/// ciphertext sealed with (our secret, their public) opens with (their
/// secret, our public) — the recipient authenticates the sender by the
/// key that opens the box.
use std::fmt;
use std::str::FromStr;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::HearthProtocolError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"hearth-protocol-box-xchacha20poly1305-v1";

/// Public half of an encryption key pair. Hex string on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({}...)", &hex::encode(self.0)[..12])
    }
}

impl FromStr for EncryptionKey {
    type Err = HearthProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| HearthProtocolError::Crypto("invalid key hex".into()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| HearthProtocolError::Crypto("key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for EncryptionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for EncryptionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A node's X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: EncryptionKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        use chacha20poly1305::aead::rand_core::OsRng;
        Self::from_secret_bytes(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Build a key pair from raw secret bytes (deterministic — tests
    /// and key storage).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = EncryptionKey(X25519Public::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public(&self) -> EncryptionKey {
        self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish()
    }
}

/// Ciphertext plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedBox {
    /// XChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 24-byte nonce (XChaCha20 extended nonce — safe to generate randomly).
    pub nonce: [u8; 24],
}

/// Derive the 32-byte AEAD key for a peer pair via HKDF-SHA256.
fn derive_key(ours: &StaticSecret, theirs: &EncryptionKey) -> [u8; 32] {
    let shared = ours.diffie_hellman(&X25519Public::from(*theirs.as_bytes()));
    let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

/// Seal `plaintext` for the peer holding `recipient`.
pub fn seal(
    plaintext: &[u8],
    recipient: &EncryptionKey,
    sender: &KeyPair,
) -> Result<SealedBox, HearthProtocolError> {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

    let key = derive_key(&sender.secret, recipient);
    let cipher = XChaCha20Poly1305::new(&key.into());

    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| HearthProtocolError::Crypto(format!("encryption failed: {e}")))?;

    Ok(SealedBox { ciphertext, nonce: nonce_bytes })
}

/// Open a box sealed by the peer holding `sender`.
pub fn open(
    sealed: &SealedBox,
    sender: &EncryptionKey,
    recipient: &KeyPair,
) -> Result<Vec<u8>, HearthProtocolError> {
    let key = derive_key(&recipient.secret, sender);
    let cipher = XChaCha20Poly1305::new(&key.into());

    let nonce = XNonce::from(sealed.nonce);
    cipher
        .decrypt(&nonce, sealed.ciphertext.as_ref())
        .map_err(|_| HearthProtocolError::Crypto("decryption failed: authentication error".into()))
}
