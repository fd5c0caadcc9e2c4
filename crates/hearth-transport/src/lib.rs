//! Hearth transport contract.
//!
//! The overlay does not implement discovery, NAT traversal, or wire
//! security itself — it consumes a swarm collaborator that turns a
//! 32-byte [`Topic`] into duplex connections annotated with the remote
//! peer's identity. This crate pins that contract: [`Swarm`] (join a
//! topic, receive [`SwarmEvent`]s), [`PeerLink`] (ordered frame writes
//! to one peer), and the identity/rendezvous types they share.
//!
//! [`mem`] provides an in-process implementation used by tests and
//! local simulations.

mod error;
pub mod mem;

pub use error::HearthTransportError;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Transport identity of a peer — an opaque 32-byte public identifier.
///
/// Displayed and parsed as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}...)", &hex::encode(self.0)[..12])
    }
}

impl FromStr for PeerId {
    type Err = HearthTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| HearthTransportError::InvalidPeerId(s.to_string()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| HearthTransportError::InvalidPeerId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte rendezvous identifier.
///
/// Peers that join the same topic are eventually connected to each
/// other by the swarm. Topics are derived by hashing a domain label
/// together with application material, so distinct uses of the swarm
/// can never collide.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic([u8; 32]);

impl Topic {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a topic from a domain-separation label and arbitrary material.
    pub fn derive(label: &str, material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        hasher.update([0x00]);
        hasher.update(material);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({}...)", &hex::encode(self.0)[..12])
    }
}

/// How a peer participates in a topic.
///
/// `lookup` peers search for `announce` peers; two peers are connected
/// when one side announces and the other looks up. Room members do
/// both, so every member pair connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinMode {
    pub announce: bool,
    pub lookup: bool,
}

impl JoinMode {
    /// Announce only — be findable, do not search (server side).
    pub const ANNOUNCE: Self = Self { announce: true, lookup: false };
    /// Lookup only — search for announcers (client side).
    pub const LOOKUP: Self = Self { announce: false, lookup: true };
    /// Announce and look up — full mesh among joiners.
    pub const BOTH: Self = Self { announce: true, lookup: true };
}

/// Write half of one connection. Writes are ordered per link.
///
/// Dropping every clone of a link releases the connection.
#[async_trait::async_trait]
pub trait PeerLink: Send + Sync {
    /// Write one frame to the remote peer.
    async fn send(&self, frame: Bytes) -> Result<(), HearthTransportError>;
}

/// Something that happened on the swarm.
pub enum SwarmEvent {
    /// A new connection was established on some joined topic.
    PeerConnected { peer: PeerId, link: Arc<dyn PeerLink> },
    /// The connection to a peer was lost or closed.
    PeerDisconnected { peer: PeerId },
    /// One inbound frame. Frames from a single peer arrive in order.
    Frame { peer: PeerId, payload: Bytes },
}

impl fmt::Debug for SwarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmEvent::PeerConnected { peer, .. } => {
                f.debug_struct("PeerConnected").field("peer", peer).finish()
            }
            SwarmEvent::PeerDisconnected { peer } => {
                f.debug_struct("PeerDisconnected").field("peer", peer).finish()
            }
            SwarmEvent::Frame { peer, payload } => f
                .debug_struct("Frame")
                .field("peer", peer)
                .field("len", &payload.len())
                .finish(),
        }
    }
}

/// The discovery/transport collaborator contract.
///
/// Implementations own sockets, hole punching, and peer search; the
/// overlay only ever sees identified connections and ordered frames.
#[async_trait::async_trait]
pub trait Swarm: Send {
    /// The local peer's transport identity.
    fn local_id(&self) -> PeerId;

    /// Join a rendezvous topic. Connections surface as
    /// [`SwarmEvent::PeerConnected`] on the event stream.
    ///
    /// Joining is the only transport operation whose failure is fatal
    /// to the caller.
    async fn join(&mut self, topic: Topic, mode: JoinMode) -> Result<(), HearthTransportError>;

    /// Next swarm event. `None` means the swarm has shut down.
    async fn next_event(&mut self) -> Option<SwarmEvent>;
}
