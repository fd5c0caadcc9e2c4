//! Hearth protocol layer.
//!
//! A peer-to-peer room chat overlay on top of `hearth-transport`:
//! peers discovered through a rendezvous topic exchange encrypted
//! messages directly, while a designated root peer durably stores
//! every room's messages in an append-only ledger and serves
//! incremental sync to clients that were offline.
//!
//! Wire format: JSON envelopes discriminated by a `type` tag.
//! Crypto: X25519 + HKDF-SHA256 + XChaCha20-Poly1305, one fresh
//! ciphertext per recipient.

pub mod broadcast;
pub mod crypto;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod sync;
pub mod types;

pub use broadcast::{BroadcastEngine, DeliveryReport};
pub use crypto::{EncryptionKey, KeyPair, SealedBox};
pub use dispatch::EncryptionDispatcher;
pub use envelope::{ChatFrame, Envelope, FrameVerdict, PlainChat, SealedChat, StoredMessage};
pub use error::HearthProtocolError;
pub use ledger::{AppendLog, LogStore, MemoryLogStore, RoomLedger, RoomRecord, SqliteLogStore};
pub use registry::{PeerConnection, PeerRegistry};
pub use router::{MessageRouter, ProtocolAction};
pub use runtime::{
    ProtocolEvent, Runtime, RuntimeChannels, RuntimeCommand, RuntimeConfig, RuntimeHandle,
};
pub use sync::{SyncOutcome, SyncTracker};
pub use types::{now_ms, root_rendezvous_topic, ChatBody, PeerId, ReceivedMessage, RoomName};
