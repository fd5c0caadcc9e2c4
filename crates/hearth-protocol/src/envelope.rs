/// Wire envelopes — the typed unit exchanged over a peer connection.
///
/// Serialized as JSON: kebab-case `type` tags, camelCase fields. The
/// overlay shares its streams with transport housekeeping, so anything
/// that does not parse as the envelope union is classified as opaque
/// traffic and dropped without error.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::EncryptionKey;
use crate::error::HearthProtocolError;
use crate::types::{ChatBody, PeerId, RoomName};

/// Protocol envelope, discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// The root peer declaring itself. No payload — receiving it is
    /// the readiness signal for registration and sync.
    RootPeerAnnounce,
    /// Encryption key exchange, sent once per connection.
    PublicKey {
        key: EncryptionKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    /// A chat message: per-recipient ciphertext, or the plaintext
    /// historical replay shape.
    ChatMessage(ChatFrame),
    /// Ask the root peer to append a message to a room's ledger.
    StoreMessage {
        #[serde(rename = "roomName")]
        room: RoomName,
        message: ChatBody,
    },
    /// Ask the root peer for everything at or after `last_index`.
    SyncRequest {
        #[serde(rename = "roomName")]
        room: RoomName,
        last_index: u64,
    },
    /// The root peer's answer: ledger entries in ascending index order.
    SyncResponse {
        #[serde(rename = "roomName")]
        room: RoomName,
        messages: Vec<StoredMessage>,
    },
    /// Ask the root peer to open a room's ledger.
    RegisterRoom {
        #[serde(rename = "roomId")]
        room: RoomName,
    },
}

/// The two shapes a `chat-message` can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatFrame {
    Sealed(SealedChat),
    Plain(PlainChat),
}

/// Per-recipient ciphertext, produced fresh for every recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedChat {
    pub encrypted: bool,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_nonce")]
    pub nonce: [u8; 24],
    pub sender_key: EncryptionKey,
}

/// Plaintext replay shape used for historical messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainChat {
    pub message: ChatBody,
    #[serde(default)]
    pub from_sync: bool,
}

/// One ledger entry as carried in a `sync-response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Zero-based, contiguous ledger index.
    pub index: u64,
    pub message: ChatBody,
    /// Unix ms at append time on the root peer.
    pub stored_at: u64,
    /// Transport identity of the original sender.
    pub from_peer: PeerId,
}

/// What an inbound frame turned out to be.
#[derive(Debug)]
pub enum FrameVerdict {
    /// A well-formed protocol envelope.
    Envelope(Envelope),
    /// Well-formed, but a `type` this build does not know. Logged and
    /// dropped, never fatal.
    UnknownType(String),
    /// Non-protocol traffic, or a known type missing required fields.
    /// Silently dropped.
    Opaque,
}

impl Envelope {
    /// Serialize for the wire.
    pub fn to_wire(&self) -> Result<Bytes, HearthProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Classify an inbound frame. Never errors: frames that are not
    /// envelopes are expected traffic on a shared stream.
    pub fn classify(bytes: &[u8]) -> FrameVerdict {
        match serde_json::from_slice::<Envelope>(bytes) {
            Ok(envelope) => FrameVerdict::Envelope(envelope),
            Err(_) => match serde_json::from_slice::<serde_json::Value>(bytes) {
                Ok(value) => match value.get("type").and_then(|t| t.as_str()) {
                    Some(tag) if !known_type(tag) => FrameVerdict::UnknownType(tag.to_string()),
                    _ => FrameVerdict::Opaque,
                },
                Err(_) => FrameVerdict::Opaque,
            },
        }
    }
}

fn known_type(tag: &str) -> bool {
    matches!(
        tag,
        "root-peer-announce"
            | "public-key"
            | "chat-message"
            | "store-message"
            | "sync-request"
            | "sync-response"
            | "register-room"
    )
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod b64_nonce {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &[u8; 24], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 24], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = STANDARD.decode(s).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be 24 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn body() -> ChatBody {
        ChatBody {
            sender: "alice".into(),
            text: "hello".into(),
            sent_at: 1708000000000,
        }
    }

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 32])
    }

    #[test]
    fn roundtrip_all_variants() {
        let key = KeyPair::from_secret_bytes([9; 32]).public();
        let envelopes = [
            Envelope::RootPeerAnnounce,
            Envelope::PublicKey { key, display_name: Some("alice".into()) },
            Envelope::ChatMessage(ChatFrame::Sealed(SealedChat {
                encrypted: true,
                ciphertext: vec![1, 2, 3],
                nonce: [7; 24],
                sender_key: key,
            })),
            Envelope::ChatMessage(ChatFrame::Plain(PlainChat {
                message: body(),
                from_sync: true,
            })),
            Envelope::StoreMessage { room: "general".into(), message: body() },
            Envelope::SyncRequest { room: "general".into(), last_index: 3 },
            Envelope::SyncResponse {
                room: "general".into(),
                messages: vec![StoredMessage {
                    index: 0,
                    message: body(),
                    stored_at: 1708000000001,
                    from_peer: peer(1),
                }],
            },
            Envelope::RegisterRoom { room: "general".into() },
        ];

        for envelope in envelopes {
            let wire = envelope.to_wire().unwrap();
            match Envelope::classify(&wire) {
                FrameVerdict::Envelope(decoded) => assert_eq!(decoded, envelope),
                other => panic!("expected Envelope, got {other:?}"),
            }
        }
    }

    #[test]
    fn wire_type_tags_are_kebab_case() {
        let wire = Envelope::RootPeerAnnounce.to_wire().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(value["type"], "root-peer-announce");

        let wire = Envelope::SyncRequest { room: "x".into(), last_index: 0 }
            .to_wire()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(value["type"], "sync-request");
        assert_eq!(value["roomName"], "x");
        assert_eq!(value["lastIndex"], 0);
    }

    #[test]
    fn register_room_uses_room_id_field() {
        let wire = Envelope::RegisterRoom { room: "x".into() }.to_wire().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(value["roomId"], "x");
    }

    #[test]
    fn arbitrary_bytes_are_opaque() {
        assert!(matches!(Envelope::classify(b"\x00\x01binary"), FrameVerdict::Opaque));
        assert!(matches!(Envelope::classify(b"not json at all"), FrameVerdict::Opaque));
        assert!(matches!(Envelope::classify(b"{}"), FrameVerdict::Opaque));
        assert!(matches!(Envelope::classify(b"[1,2,3]"), FrameVerdict::Opaque));
    }

    #[test]
    fn unknown_type_is_reported() {
        match Envelope::classify(br#"{"type":"unknown-thing"}"#) {
            FrameVerdict::UnknownType(tag) => assert_eq!(tag, "unknown-thing"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn known_type_with_missing_fields_is_opaque() {
        // sync-request without lastIndex: malformed, not unknown.
        assert!(matches!(
            Envelope::classify(br#"{"type":"sync-request","roomName":"x"}"#),
            FrameVerdict::Opaque
        ));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let frame = br#"{"type":"sync-request","roomName":"x","lastIndex":2,"extra":"ignored"}"#;
        match Envelope::classify(frame) {
            FrameVerdict::Envelope(Envelope::SyncRequest { room, last_index }) => {
                assert_eq!(room, "x".into());
                assert_eq!(last_index, 2);
            }
            other => panic!("expected SyncRequest, got {other:?}"),
        }
    }

    #[test]
    fn chat_frame_shapes_disambiguate() {
        // Sealed shape.
        let key = KeyPair::from_secret_bytes([9; 32]).public();
        let sealed = Envelope::ChatMessage(ChatFrame::Sealed(SealedChat {
            encrypted: true,
            ciphertext: vec![0xAA; 8],
            nonce: [1; 24],
            sender_key: key,
        }));
        let wire = sealed.to_wire().unwrap();
        match Envelope::classify(&wire) {
            FrameVerdict::Envelope(Envelope::ChatMessage(ChatFrame::Sealed(s))) => {
                assert!(s.encrypted);
                assert_eq!(s.ciphertext, vec![0xAA; 8]);
            }
            other => panic!("expected Sealed, got {other:?}"),
        }

        // Plain replay shape.
        let frame = br#"{"type":"chat-message","message":{"sender":"bob","text":"hi","sentAt":5}}"#;
        match Envelope::classify(frame) {
            FrameVerdict::Envelope(Envelope::ChatMessage(ChatFrame::Plain(p))) => {
                assert_eq!(p.message.sender, "bob");
                assert!(!p.from_sync);
            }
            other => panic!("expected Plain, got {other:?}"),
        }
    }

    #[test]
    fn public_key_display_name_optional() {
        let key = KeyPair::from_secret_bytes([3; 32]).public();
        let frame = format!(r#"{{"type":"public-key","key":"{key}"}}"#);
        match Envelope::classify(frame.as_bytes()) {
            FrameVerdict::Envelope(Envelope::PublicKey { key: parsed, display_name }) => {
                assert_eq!(parsed, key);
                assert!(display_name.is_none());
            }
            other => panic!("expected PublicKey, got {other:?}"),
        }
    }
}
