/// Envelope routing engine.
///
/// Owns the shared mutable protocol state (peer registry, sync
/// tracker, and — on the root peer — the room ledger) and turns
/// transport-level inputs into [`ProtocolAction`]s. Pure decision
/// logic in the state-machine sense: no I/O, no channels; the runtime
/// loop executes the returned actions.
use std::sync::Arc;
use std::time::Duration;

use hearth_transport::{PeerId, PeerLink};

use crate::crypto::KeyPair;
use crate::dispatch::EncryptionDispatcher;
use crate::envelope::{ChatFrame, Envelope, FrameVerdict};
use crate::ledger::RoomLedger;
use crate::registry::PeerRegistry;
use crate::runtime::ProtocolEvent;
use crate::sync::SyncTracker;
use crate::types::{ReceivedMessage, RoomName};

/// What the runtime should do with the outcome of a routed input.
#[derive(Debug)]
pub enum ProtocolAction {
    /// Write an envelope to one peer's connection.
    Send { to: PeerId, envelope: Envelope },
    /// Surface a message to the application layer.
    Deliver(ReceivedMessage),
    /// Emit a protocol event to the application layer.
    Emit(ProtocolEvent),
}

pub struct MessageRouter {
    local: PeerId,
    display_name: String,
    dispatcher: EncryptionDispatcher,
    registry: PeerRegistry,
    sync: SyncTracker,
    /// Present on the root peer only.
    ledger: Option<RoomLedger>,
}

impl MessageRouter {
    pub fn new(
        local: PeerId,
        display_name: String,
        keys: KeyPair,
        sync_timeout: Duration,
        ledger: Option<RoomLedger>,
    ) -> Self {
        Self {
            local,
            display_name,
            dispatcher: EncryptionDispatcher::new(keys),
            registry: PeerRegistry::new(),
            sync: SyncTracker::new(sync_timeout),
            ledger,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Whether this node serves a ledger (is the root peer).
    pub fn is_root(&self) -> bool {
        self.ledger.is_some()
    }

    pub fn ledger(&self) -> Option<&RoomLedger> {
        self.ledger.as_ref()
    }

    // ── Connection lifecycle ───────────────────────────────────────────

    /// A connection opened. Registers it and greets the peer: the root
    /// peer announces itself, everyone else offers their public key.
    pub fn handle_connection(
        &mut self,
        peer: PeerId,
        link: Arc<dyn PeerLink>,
        now: u64,
    ) -> Vec<ProtocolAction> {
        if let Err(e) = self.registry.add(peer, link, now) {
            // Keep the existing connection; the new link is dropped.
            tracing::debug!("rejecting connection: {e}");
            return Vec::new();
        }
        let greeting = if self.is_root() {
            Envelope::RootPeerAnnounce
        } else {
            Envelope::PublicKey {
                key: self.dispatcher.public_key(),
                display_name: Some(self.display_name.clone()),
            }
        };
        vec![
            ProtocolAction::Emit(ProtocolEvent::PeerConnected { peer }),
            ProtocolAction::Send { to: peer, envelope: greeting },
        ]
    }

    /// A connection closed or failed. Idempotent; other peers are
    /// unaffected.
    pub fn handle_disconnect(&mut self, peer: PeerId) -> Vec<ProtocolAction> {
        match self.registry.remove(&peer) {
            Some(_) => vec![ProtocolAction::Emit(ProtocolEvent::PeerDisconnected { peer })],
            None => Vec::new(),
        }
    }

    // ── Inbound frames ─────────────────────────────────────────────────

    /// Route one inbound frame. Never fails: frames that are not for
    /// this layer are dropped, per-message errors are contained.
    pub fn handle_frame(&mut self, peer: PeerId, frame: &[u8], now: u64) -> Vec<ProtocolAction> {
        if !self.registry.contains(&peer) {
            tracing::debug!("frame from unregistered peer {peer}, dropping");
            return Vec::new();
        }
        let envelope = match Envelope::classify(frame) {
            FrameVerdict::Envelope(envelope) => envelope,
            FrameVerdict::UnknownType(tag) => {
                tracing::debug!("unknown envelope type {tag:?} from {peer}, dropping");
                return Vec::new();
            }
            FrameVerdict::Opaque => {
                // Expected path for non-protocol traffic on shared streams.
                tracing::debug!("non-envelope frame from {peer}, dropping");
                return Vec::new();
            }
        };

        match envelope {
            Envelope::RootPeerAnnounce => self.handle_root_announce(peer, now),
            Envelope::PublicKey { key, display_name } => {
                let newly = self.registry.set_encryption_key(&peer, key);
                if let Some(name) = display_name {
                    self.registry.set_display_name(&peer, name);
                }
                if newly {
                    vec![ProtocolAction::Emit(ProtocolEvent::PeerKeyExchanged { peer })]
                } else {
                    tracing::debug!("repeated public-key from {peer}, ignoring");
                    Vec::new()
                }
            }
            Envelope::ChatMessage(ChatFrame::Sealed(sealed)) => {
                match self.dispatcher.open_chat(&sealed) {
                    Ok(body) => vec![ProtocolAction::Deliver(ReceivedMessage {
                        from: peer,
                        room: None,
                        body,
                        from_sync: false,
                        received_at: now,
                    })],
                    Err(e) => {
                        // Garbage never reaches the application.
                        tracing::warn!("decrypt failed from {peer}: {e}");
                        Vec::new()
                    }
                }
            }
            Envelope::ChatMessage(ChatFrame::Plain(plain)) => {
                vec![ProtocolAction::Deliver(ReceivedMessage {
                    from: peer,
                    room: None,
                    body: plain.message,
                    from_sync: plain.from_sync,
                    received_at: now,
                })]
            }
            Envelope::SyncResponse { room, messages } => {
                let outcome = self.sync.apply_response(&room, &messages);
                let mut actions: Vec<ProtocolAction> = messages
                    .into_iter()
                    .map(|stored| {
                        ProtocolAction::Deliver(ReceivedMessage {
                            from: stored.from_peer,
                            room: Some(room.clone()),
                            body: stored.message,
                            from_sync: true,
                            received_at: now,
                        })
                    })
                    .collect();
                actions.push(ProtocolAction::Emit(ProtocolEvent::SyncCompleted {
                    room,
                    next_index: outcome.next_index,
                }));
                actions
            }
            Envelope::StoreMessage { room, message } => {
                let Some(ledger) = self.ledger.as_mut() else {
                    tracing::debug!("store-message from {peer} but no ledger here, dropping");
                    return Vec::new();
                };
                match ledger.append(&room, &message, peer, now) {
                    Ok(index) => {
                        tracing::debug!("stored message {index} for room {room}");
                    }
                    Err(e) => {
                        // Scoped to this append; the connection lives on.
                        tracing::warn!("append to room {room} failed: {e}");
                    }
                }
                Vec::new()
            }
            Envelope::SyncRequest { room, last_index } => {
                let Some(ledger) = self.ledger.as_ref() else {
                    tracing::debug!("sync-request from {peer} but no ledger here, dropping");
                    return Vec::new();
                };
                match ledger.slice(&room, last_index) {
                    Ok(messages) => vec![ProtocolAction::Send {
                        to: peer,
                        envelope: Envelope::SyncResponse { room, messages },
                    }],
                    Err(e) => {
                        tracing::warn!("slice of room {room} failed: {e}");
                        Vec::new()
                    }
                }
            }
            Envelope::RegisterRoom { room } => {
                let Some(ledger) = self.ledger.as_mut() else {
                    tracing::debug!("register-room from {peer} but no ledger here, dropping");
                    return Vec::new();
                };
                if let Err(e) = ledger.ensure_open(&room, now) {
                    tracing::warn!("open of room {room} failed: {e}");
                }
                Vec::new()
            }
        }
    }

    /// The root announced itself. The announce frame *is* the
    /// readiness signal: registration and sync go out in direct
    /// response, never after a timer.
    fn handle_root_announce(&mut self, peer: PeerId, now: u64) -> Vec<ProtocolAction> {
        if !self.registry.mark_root_peer(&peer) {
            // Already classified (or peer just vanished) — classification
            // is decided once and never revisited.
            return Vec::new();
        }
        let mut actions = vec![ProtocolAction::Emit(ProtocolEvent::RootPeerDiscovered { peer })];
        for room in self.sync.rooms() {
            actions.push(ProtocolAction::Send {
                to: peer,
                envelope: Envelope::RegisterRoom { room: room.clone() },
            });
            actions.push(ProtocolAction::Send {
                to: peer,
                envelope: self.sync.begin_request(&room, now),
            });
        }
        actions
    }

    // ── Sync bookkeeping ───────────────────────────────────────────────

    /// Start caring about a room's history. If a root peer is already
    /// connected, register and sync immediately.
    pub fn track_room(&mut self, room: RoomName, now: u64) -> Vec<ProtocolAction> {
        self.sync.track(room.clone());
        let Some(root) = self.registry.root_peer() else {
            return Vec::new();
        };
        let to = root.peer_id;
        vec![
            ProtocolAction::Send { to, envelope: Envelope::RegisterRoom { room: room.clone() } },
            ProtocolAction::Send { to, envelope: self.sync.begin_request(&room, now) },
        ]
    }

    /// Explicitly re-request history for every tracked room without an
    /// in-flight request.
    pub fn resync(&mut self, now: u64) -> Vec<ProtocolAction> {
        let Some(root) = self.registry.root_peer() else {
            return Vec::new();
        };
        let to = root.peer_id;
        let idle: Vec<RoomName> = self
            .sync
            .rooms()
            .into_iter()
            .filter(|room| !self.sync.is_pending(room, now))
            .collect();
        idle.into_iter()
            .map(|room| ProtocolAction::Send { to, envelope: self.sync.begin_request(&room, now) })
            .collect()
    }

    /// Expire overdue sync requests; while the root is still reachable
    /// they are re-issued instead of hanging forever.
    pub fn tick_sync(&mut self, now: u64) -> Vec<ProtocolAction> {
        let expired = self.sync.expire(now);
        if expired.is_empty() {
            return Vec::new();
        }
        let Some(root) = self.registry.root_peer() else {
            return Vec::new();
        };
        let to = root.peer_id;
        expired
            .into_iter()
            .map(|room| {
                tracing::debug!("sync request for room {room} timed out, re-issuing");
                ProtocolAction::Send { to, envelope: self.sync.begin_request(&room, now) }
            })
            .collect()
    }

    /// Flush durable state before the process exits.
    pub fn shutdown(&mut self) {
        if let Some(ledger) = self.ledger.as_mut() {
            if let Err(e) = ledger.flush() {
                tracing::warn!("ledger flush on shutdown failed: {e}");
            }
        }
    }
}
