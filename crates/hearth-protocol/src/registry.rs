/// Live connection registry — the single source of truth for "who is
/// currently reachable".
///
/// Owns every [`PeerConnection`]; no raw map is exposed. Pure in-memory
/// state, no I/O.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hearth_transport::{PeerId, PeerLink};

use crate::crypto::EncryptionKey;
use crate::error::HearthProtocolError;

/// One live transport connection and what we know about its peer.
pub struct PeerConnection {
    pub peer_id: PeerId,
    /// Write half of the connection. Ordered per link.
    pub link: Arc<dyn PeerLink>,
    /// Unix ms at connection time.
    pub connected_at: u64,
    /// Root classification — set at most once, never unset while connected.
    pub is_root_peer: bool,
    /// Remote encryption key, set once upon key exchange.
    pub encryption_key: Option<EncryptionKey>,
    pub display_name: Option<String>,
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer_id", &self.peer_id)
            .field("is_root_peer", &self.is_root_peer)
            .field("encryption_ready", &self.encryption_key.is_some())
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Tracks live connections and their classification.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerConnection>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    ///
    /// A peer id maps to at most one live connection: if one already
    /// exists, the existing connection is kept and `DuplicateConnection`
    /// is returned so the caller can discard the new link.
    pub fn add(
        &mut self,
        peer_id: PeerId,
        link: Arc<dyn PeerLink>,
        now: u64,
    ) -> Result<(), HearthProtocolError> {
        if self.peers.contains_key(&peer_id) {
            return Err(HearthProtocolError::DuplicateConnection { peer: peer_id });
        }
        self.peers.insert(
            peer_id,
            PeerConnection {
                peer_id,
                link,
                connected_at: now,
                is_root_peer: false,
                encryption_key: None,
                display_name: None,
            },
        );
        Ok(())
    }

    /// Remove a connection. Idempotent — absent peers are not an error.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerConnection> {
        self.peers.remove(peer_id)
    }

    /// Classify a peer as the root peer. Decided once: returns `true`
    /// only on the first call for a connected peer.
    pub fn mark_root_peer(&mut self, peer_id: &PeerId) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(conn) if !conn.is_root_peer => {
                conn.is_root_peer = true;
                true
            }
            _ => false,
        }
    }

    /// Record the peer's encryption key. Set once: a second key for the
    /// same connection is ignored. Returns `true` when newly set.
    pub fn set_encryption_key(&mut self, peer_id: &PeerId, key: EncryptionKey) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(conn) if conn.encryption_key.is_none() => {
                conn.encryption_key = Some(key);
                true
            }
            _ => false,
        }
    }

    pub fn set_display_name(&mut self, peer_id: &PeerId, name: String) {
        if let Some(conn) = self.peers.get_mut(peer_id) {
            conn.display_name = Some(name);
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerConnection> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// All live connections, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    /// The root peer's connection, if one is classified.
    pub fn root_peer(&self) -> Option<&PeerConnection> {
        self.peers.values().find(|c| c.is_root_peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
