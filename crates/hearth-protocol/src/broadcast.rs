/// Broadcast fan-out across the peer set.
///
/// Each peer's send is isolated: one failing connection never aborts
/// delivery to the rest. Counts report successful writes, not remote
/// receipt; durability for unreachable peers is the ledger's job, so
/// nothing is queued or retried here.
use crate::dispatch::EncryptionDispatcher;
use crate::registry::PeerRegistry;
use crate::types::{ChatBody, RoomName};

/// Successful deliveries by peer category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Ordinary peers that accepted the write.
    pub peer_count: usize,
    /// Root peers that accepted the write (0 or 1 in practice).
    pub root_peer_count: usize,
}

pub struct BroadcastEngine {
    dispatcher: EncryptionDispatcher,
}

impl BroadcastEngine {
    pub fn new(dispatcher: EncryptionDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Fan `body` out to every connection in the registry.
    pub async fn broadcast(
        &self,
        registry: &PeerRegistry,
        room: &RoomName,
        body: &ChatBody,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for conn in registry.all() {
            let envelope = match self.dispatcher.plan(room, body, conn) {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue, // no key yet — fire-and-forget
                Err(e) => {
                    tracing::warn!("broadcast: planning for {} failed: {e}", conn.peer_id);
                    continue;
                }
            };
            let frame = match envelope.to_wire() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("broadcast: serialize for {} failed: {e}", conn.peer_id);
                    continue;
                }
            };
            match conn.link.send(frame).await {
                Ok(()) => {
                    if conn.is_root_peer {
                        report.root_peer_count += 1;
                    } else {
                        report.peer_count += 1;
                    }
                }
                Err(e) => {
                    // Isolated: the transport surfaces the disconnect separately.
                    tracing::warn!("broadcast: send to {} failed: {e}", conn.peer_id);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use hearth_transport::{HearthTransportError, PeerId, PeerLink};

    use crate::crypto::KeyPair;
    use crate::envelope::{ChatFrame, Envelope, FrameVerdict};

    /// Records every frame written to it.
    #[derive(Clone, Default)]
    struct RecordingLink {
        sent: Arc<Mutex<Vec<Bytes>>>,
    }

    impl RecordingLink {
        fn frames(&self) -> Vec<Bytes> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PeerLink for RecordingLink {
        async fn send(&self, frame: Bytes) -> Result<(), HearthTransportError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }
    }

    /// Always fails, like a peer that vanished mid-broadcast.
    struct FailingLink;

    #[async_trait::async_trait]
    impl PeerLink for FailingLink {
        async fn send(&self, _frame: Bytes) -> Result<(), HearthTransportError> {
            Err(HearthTransportError::ConnectionClosed {
                peer: PeerId::from_bytes([0; 32]),
            })
        }
    }

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 32])
    }

    fn body() -> ChatBody {
        ChatBody {
            sender: "alice".into(),
            text: "Hi".into(),
            sent_at: 1708000000000,
        }
    }

    fn engine(seed: u8) -> BroadcastEngine {
        BroadcastEngine::new(EncryptionDispatcher::new(KeyPair::from_secret_bytes([seed; 32])))
    }

    #[tokio::test]
    async fn keyed_peer_and_root_both_counted() {
        let mut registry = PeerRegistry::new();
        let bob_link = RecordingLink::default();
        let root_link = RecordingLink::default();

        registry.add(peer(2), Arc::new(bob_link.clone()), 0).unwrap();
        registry.set_encryption_key(&peer(2), KeyPair::from_secret_bytes([2; 32]).public());
        registry.add(peer(9), Arc::new(root_link.clone()), 0).unwrap();
        registry.mark_root_peer(&peer(9));

        let report = engine(1).broadcast(&registry, &"general".into(), &body()).await;
        assert_eq!(report, DeliveryReport { peer_count: 1, root_peer_count: 1 });

        // Bob got exactly one sealed chat-message.
        let frames = bob_link.frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            Envelope::classify(&frames[0]),
            FrameVerdict::Envelope(Envelope::ChatMessage(ChatFrame::Sealed(_)))
        ));

        // The root got exactly one store-message naming the room.
        let frames = root_link.frames();
        assert_eq!(frames.len(), 1);
        match Envelope::classify(&frames[0]) {
            FrameVerdict::Envelope(Envelope::StoreMessage { room, message }) => {
                assert_eq!(room, "general".into());
                assert_eq!(message, body());
            }
            other => panic!("expected StoreMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unkeyed_peer_not_counted_and_receives_nothing() {
        let mut registry = PeerRegistry::new();
        let link = RecordingLink::default();
        registry.add(peer(2), Arc::new(link.clone()), 0).unwrap();

        let report = engine(1).broadcast(&registry, &"general".into(), &body()).await;
        assert_eq!(report, DeliveryReport::default());
        assert!(link.frames().is_empty());
    }

    #[tokio::test]
    async fn failing_peer_does_not_affect_others() {
        let mut registry = PeerRegistry::new();

        // Four healthy keyed peers, one failing, plus a root.
        let mut links = Vec::new();
        for seed in 2..=5u8 {
            let link = RecordingLink::default();
            registry.add(peer(seed), Arc::new(link.clone()), 0).unwrap();
            registry
                .set_encryption_key(&peer(seed), KeyPair::from_secret_bytes([seed; 32]).public());
            links.push(link);
        }
        registry.add(peer(6), Arc::new(FailingLink), 0).unwrap();
        registry.set_encryption_key(&peer(6), KeyPair::from_secret_bytes([6; 32]).public());
        let root_link = RecordingLink::default();
        registry.add(peer(9), Arc::new(root_link.clone()), 0).unwrap();
        registry.mark_root_peer(&peer(9));

        let report = engine(1).broadcast(&registry, &"general".into(), &body()).await;
        assert_eq!(report, DeliveryReport { peer_count: 4, root_peer_count: 1 });
        for link in links {
            assert_eq!(link.frames().len(), 1);
        }
        assert_eq!(root_link.frames().len(), 1);
    }
}
