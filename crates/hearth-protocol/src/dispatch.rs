/// Per-peer encryption dispatch.
///
/// The dispatcher never encrypts once-for-all: every outbound message
/// is re-planned per recipient. The root peer is a durable relay, not
/// a confidant — it receives the body verbatim in a `store-message`
/// naming the target room. Ordinary peers get a fresh per-recipient
/// ciphertext, and peers without an exchanged key are skipped outright
/// (fire-and-forget; the ledger covers them once they sync).
use crate::crypto::{self, EncryptionKey, KeyPair, SealedBox};
use crate::envelope::{ChatFrame, Envelope, SealedChat};
use crate::error::HearthProtocolError;
use crate::registry::PeerConnection;
use crate::types::{ChatBody, RoomName};

pub struct EncryptionDispatcher {
    keys: KeyPair,
}

impl EncryptionDispatcher {
    pub fn new(keys: KeyPair) -> Self {
        Self { keys }
    }

    /// Our public encryption key, as announced in `public-key` frames.
    pub fn public_key(&self) -> EncryptionKey {
        self.keys.public()
    }

    /// Decide the envelope for one peer. `None` means this peer is
    /// skipped for this send.
    pub fn plan(
        &self,
        room: &RoomName,
        body: &ChatBody,
        peer: &PeerConnection,
    ) -> Result<Option<Envelope>, HearthProtocolError> {
        if peer.is_root_peer {
            return Ok(Some(Envelope::StoreMessage {
                room: room.clone(),
                message: body.clone(),
            }));
        }
        let Some(their_key) = peer.encryption_key else {
            return Ok(None);
        };
        let plaintext = serde_json::to_vec(body)?;
        let SealedBox { ciphertext, nonce } = crypto::seal(&plaintext, &their_key, &self.keys)?;
        Ok(Some(Envelope::ChatMessage(ChatFrame::Sealed(SealedChat {
            encrypted: true,
            ciphertext,
            nonce,
            sender_key: self.keys.public(),
        }))))
    }

    /// Open an inbound sealed chat frame and decode its body.
    pub fn open_chat(&self, sealed: &SealedChat) -> Result<ChatBody, HearthProtocolError> {
        let boxed = SealedBox {
            ciphertext: sealed.ciphertext.clone(),
            nonce: sealed.nonce,
        };
        let plaintext = crypto::open(&boxed, &sealed.sender_key, &self.keys)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
