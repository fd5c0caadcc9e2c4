//! The runtime event loop.
//!
//! A single async task that owns all mutable protocol state and
//! multiplexes over transport events, application commands, and the
//! sync expiry timer. Everything between awaits is atomic with
//! respect to other protocol events.
use tokio::sync::mpsc;

use hearth_transport::{Swarm, SwarmEvent};

use crate::broadcast::BroadcastEngine;
use crate::router::{MessageRouter, ProtocolAction};
use crate::types::now_ms;

use super::{ProtocolEvent, RuntimeCommand, RuntimeConfig};

pub(super) async fn runtime_loop<S: Swarm>(
    mut swarm: S,
    mut router: MessageRouter,
    engine: BroadcastEngine,
    config: RuntimeConfig,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) {
    let mut sync_tick = tokio::time::interval(config.sync_timeout);
    sync_tick.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            event = swarm.next_event() => {
                let Some(event) = event else {
                    tracing::info!("transport closed, shutting down runtime");
                    break;
                };
                let actions = match event {
                    SwarmEvent::PeerConnected { peer, link } => {
                        router.handle_connection(peer, link, now_ms())
                    }
                    SwarmEvent::PeerDisconnected { peer } => router.handle_disconnect(peer),
                    SwarmEvent::Frame { peer, payload } => {
                        router.handle_frame(peer, &payload, now_ms())
                    }
                };
                execute(&router, actions, &event_tx).await;
            }

            command = cmd_rx.recv() => {
                match command {
                    Some(RuntimeCommand::Broadcast { room, body, reply }) => {
                        let report = engine.broadcast(router.registry(), &room, &body).await;
                        let _ = reply.send(report);
                    }
                    Some(RuntimeCommand::Resync) => {
                        let actions = router.resync(now_ms());
                        execute(&router, actions, &event_tx).await;
                    }
                    Some(RuntimeCommand::TrackRoom { room }) => {
                        let actions = router.track_room(room, now_ms());
                        execute(&router, actions, &event_tx).await;
                    }
                    Some(RuntimeCommand::GetPeers { reply }) => {
                        let peers = router.registry().all().map(|c| c.peer_id).collect();
                        let _ = reply.send(peers);
                    }
                    Some(RuntimeCommand::Shutdown) | None => break,
                }
            }

            _ = sync_tick.tick() => {
                let actions = router.tick_sync(now_ms());
                execute(&router, actions, &event_tx).await;
            }
        }
    }

    router.shutdown();
}

/// Execute router actions — the only place in the loop that touches
/// connection writes and the event channel.
async fn execute(
    router: &MessageRouter,
    actions: Vec<ProtocolAction>,
    event_tx: &mpsc::Sender<ProtocolEvent>,
) {
    for action in actions {
        match action {
            ProtocolAction::Send { to, envelope } => {
                let Some(conn) = router.registry().get(&to) else {
                    tracing::debug!("send target {to} no longer connected, dropping");
                    continue;
                };
                match envelope.to_wire() {
                    Ok(frame) => {
                        if let Err(e) = conn.link.send(frame).await {
                            // The transport surfaces the disconnect as its own event.
                            tracing::warn!("send to {to} failed: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("serialize envelope for {to} failed: {e}"),
                }
            }
            ProtocolAction::Deliver(message) => {
                // try_send: never block the loop; the consumer drains.
                let _ = event_tx.try_send(ProtocolEvent::MessageReceived(message));
            }
            ProtocolAction::Emit(event) => {
                let _ = event_tx.try_send(event);
            }
        }
    }
}
