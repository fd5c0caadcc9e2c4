/// Protocol runtime — integrates the protocol modules into a live
/// event loop.
///
/// The runtime owns the swarm and all protocol state (registry, sync
/// tracker, ledger) and exposes a channel-based API, so the
/// application never touches raw bytes or protocol internals. One
/// async task is the single logical actor mutating shared state;
/// ledger appends are serialized by construction.
mod r#loop;

use std::path::PathBuf;
use std::time::Duration;

use hearth_transport::{JoinMode, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{BroadcastEngine, DeliveryReport};
use crate::crypto::KeyPair;
use crate::dispatch::EncryptionDispatcher;
use crate::error::HearthProtocolError;
use crate::ledger::{RoomLedger, SqliteLogStore};
use crate::router::MessageRouter;
use crate::types::{now_ms, root_rendezvous_topic, ChatBody, ReceivedMessage, RoomName};

// ── Configuration ─────────────────────────────────────────────────────

pub struct RuntimeConfig {
    /// Display name announced with our public key.
    pub display_name: String,
    /// Rooms whose members to discover and whose history to track.
    pub rooms: Vec<RoomName>,
    /// When set, this node is the root peer and serves a durable
    /// ledger from this directory.
    pub data_dir: Option<PathBuf>,
    /// Rewrite the persisted ledger metadata after this many appends.
    pub flush_every: u32,
    /// In-flight sync requests older than this are re-issued.
    pub sync_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            display_name: "anonymous".to_string(),
            rooms: Vec::new(),
            data_dir: None,
            flush_every: 16,
            sync_timeout: Duration::from_secs(30),
        }
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
pub enum RuntimeCommand {
    /// Fan a message out to the room's peer set (and the root ledger).
    Broadcast {
        room: RoomName,
        body: ChatBody,
        reply: oneshot::Sender<DeliveryReport>,
    },
    /// Re-request history for every tracked room.
    Resync,
    /// Start caring about another room's history.
    TrackRoom { room: RoomName },
    /// Query: currently connected peers.
    GetPeers { reply: oneshot::Sender<Vec<PeerId>> },
    /// Graceful shutdown (flushes the ledger).
    Shutdown,
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// Protocol-level events the application may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A chat message was surfaced (live, or replayed from sync).
    MessageReceived(ReceivedMessage),
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId },
    /// A peer classified itself as the root peer.
    RootPeerDiscovered { peer: PeerId },
    /// A peer became encryption-ready.
    PeerKeyExchanged { peer: PeerId },
    /// A sync response was applied for a room.
    SyncCompleted { room: RoomName, next_index: u64 },
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to communicate with a running runtime. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    local_id: PeerId,
}

impl RuntimeHandle {
    /// This node's transport identity.
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Broadcast a message to a room. Returns successful delivery
    /// counts by peer category — not remote-receipt guarantees.
    pub async fn broadcast(
        &self,
        room: RoomName,
        body: ChatBody,
    ) -> Result<DeliveryReport, HearthProtocolError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::Broadcast { room, body, reply })
            .await
            .map_err(|_| HearthProtocolError::Shutdown)?;
        rx.await.map_err(|_| HearthProtocolError::Shutdown)
    }

    /// Re-request history for every tracked room.
    pub async fn resync(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Resync).await;
    }

    /// Start caring about another room's history.
    pub async fn track_room(&self, room: RoomName) {
        let _ = self.cmd_tx.send(RuntimeCommand::TrackRoom { room }).await;
    }

    /// Currently connected peers.
    pub async fn peers(&self) -> Vec<PeerId> {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(RuntimeCommand::GetPeers { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    /// Handle to send commands to the runtime.
    pub handle: RuntimeHandle,
    /// Protocol events, including received messages.
    pub events: mpsc::Receiver<ProtocolEvent>,
}

// ── Runtime ──────────────────────────────────────────────────────────

/// The protocol runtime — spawn it and communicate via channels.
pub struct Runtime;

impl Runtime {
    /// Start the runtime: open the ledger (root mode), join the
    /// rendezvous topics, and spawn the event loop.
    ///
    /// The ledger re-opens every known room *before* the swarm is
    /// joined, so no early sync request can race a not-yet-reopened
    /// room. Join failures are the one fatal error here.
    pub async fn spawn<S: Swarm + 'static>(
        mut swarm: S,
        keys: KeyPair,
        config: RuntimeConfig,
    ) -> Result<RuntimeChannels, HearthProtocolError> {
        let local = swarm.local_id();

        let ledger = match &config.data_dir {
            Some(dir) => {
                let store = SqliteLogStore::new(dir.join("rooms"))?;
                Some(RoomLedger::open(
                    Box::new(store),
                    dir.join("rooms.json"),
                    config.flush_every,
                    now_ms(),
                )?)
            }
            None => None,
        };
        let is_root = ledger.is_some();

        let mut router = MessageRouter::new(
            local,
            config.display_name.clone(),
            keys.clone(),
            config.sync_timeout,
            ledger,
        );
        for room in &config.rooms {
            router.track_room(room.clone(), now_ms());
        }

        let rendezvous_mode = if is_root { JoinMode::ANNOUNCE } else { JoinMode::LOOKUP };
        swarm.join(root_rendezvous_topic(), rendezvous_mode).await?;
        for room in &config.rooms {
            swarm.join(room.topic(), JoinMode::BOTH).await?;
        }

        let engine = BroadcastEngine::new(EncryptionDispatcher::new(keys));
        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<ProtocolEvent>(256);

        tokio::spawn(r#loop::runtime_loop(swarm, router, engine, config, cmd_rx, event_tx));

        Ok(RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, local_id: local },
            events: event_rx,
        })
    }
}
