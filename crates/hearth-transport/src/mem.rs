//! In-process swarm for tests and local simulation.
//!
//! A [`MemNet`] is a shared rendezvous table; each participant obtains
//! a [`MemSwarm`] endpoint from it. Joining a topic connects the new
//! member to every compatible existing member (announce/lookup pairing,
//! one connection per peer pair regardless of how many topics are
//! shared). Frames travel over unbounded channels, preserving
//! per-connection order. Dropping an endpoint disconnects it and
//! surfaces [`SwarmEvent::PeerDisconnected`] to its neighbors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{HearthTransportError, JoinMode, PeerId, PeerLink, Swarm, SwarmEvent, Topic};

/// Shared in-process rendezvous table.
#[derive(Clone, Default)]
pub struct MemNet {
    inner: Arc<Mutex<NetInner>>,
}

#[derive(Default)]
struct NetInner {
    /// Topic membership: who joined, and how.
    topics: HashMap<Topic, Vec<Membership>>,
    /// Live endpoints by peer id.
    nodes: HashMap<PeerId, NodeState>,
    /// Established connections, stored as normalized pairs.
    links: HashSet<(PeerId, PeerId)>,
}

#[derive(Clone, Copy)]
struct Membership {
    peer: PeerId,
    mode: JoinMode,
}

struct NodeState {
    events: mpsc::UnboundedSender<SwarmEvent>,
}

fn pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl MemNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint for `local`. Panics if the id is already
    /// registered — a memnet models one process per identity.
    pub fn endpoint(&self, local: PeerId) -> MemSwarm {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let previous = inner.nodes.insert(local, NodeState { events: tx });
        assert!(previous.is_none(), "duplicate memnet endpoint for {local}");
        MemSwarm {
            net: Arc::clone(&self.inner),
            local,
            events: rx,
        }
    }
}

impl NetInner {
    /// Connect `a` and `b` if not already connected, delivering a
    /// `PeerConnected` event (with a link) to each side.
    fn connect(&mut self, a: PeerId, b: PeerId) {
        if a == b || self.links.contains(&pair(a, b)) {
            return;
        }
        let (Some(node_a), Some(node_b)) = (self.nodes.get(&a), self.nodes.get(&b)) else {
            return;
        };
        let link_for_a = Arc::new(MemLink {
            from: a,
            to: b,
            tx: node_b.events.clone(),
        });
        let link_for_b = Arc::new(MemLink {
            from: b,
            to: a,
            tx: node_a.events.clone(),
        });
        self.links.insert(pair(a, b));
        let _ = node_a.events.send(SwarmEvent::PeerConnected { peer: b, link: link_for_a });
        let _ = node_b.events.send(SwarmEvent::PeerConnected { peer: a, link: link_for_b });
    }

    fn remove_node(&mut self, local: PeerId) {
        self.nodes.remove(&local);
        for members in self.topics.values_mut() {
            members.retain(|m| m.peer != local);
        }
        let gone: Vec<(PeerId, PeerId)> = self
            .links
            .iter()
            .filter(|(a, b)| *a == local || *b == local)
            .copied()
            .collect();
        for key in gone {
            self.links.remove(&key);
            let other = if key.0 == local { key.1 } else { key.0 };
            if let Some(node) = self.nodes.get(&other) {
                let _ = node.events.send(SwarmEvent::PeerDisconnected { peer: local });
            }
        }
    }
}

/// One endpoint on a [`MemNet`].
pub struct MemSwarm {
    net: Arc<Mutex<NetInner>>,
    local: PeerId,
    events: mpsc::UnboundedReceiver<SwarmEvent>,
}

#[async_trait::async_trait]
impl Swarm for MemSwarm {
    fn local_id(&self) -> PeerId {
        self.local
    }

    async fn join(&mut self, topic: Topic, mode: JoinMode) -> Result<(), HearthTransportError> {
        let mut inner = self.net.lock().unwrap();
        if !inner.nodes.contains_key(&self.local) {
            return Err(HearthTransportError::Shutdown);
        }
        let members = inner.topics.entry(topic).or_default().clone();
        inner
            .topics
            .get_mut(&topic)
            .expect("entry just inserted")
            .push(Membership { peer: self.local, mode });
        for member in members {
            let compatible = (mode.lookup && member.mode.announce)
                || (mode.announce && member.mode.lookup);
            if compatible {
                inner.connect(self.local, member.peer);
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SwarmEvent> {
        self.events.recv().await
    }
}

impl Drop for MemSwarm {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.net.lock() {
            inner.remove_node(self.local);
        }
    }
}

struct MemLink {
    from: PeerId,
    to: PeerId,
    tx: mpsc::UnboundedSender<SwarmEvent>,
}

#[async_trait::async_trait]
impl PeerLink for MemLink {
    async fn send(&self, frame: Bytes) -> Result<(), HearthTransportError> {
        self.tx
            .send(SwarmEvent::Frame { peer: self.from, payload: frame })
            .map_err(|_| HearthTransportError::ConnectionClosed { peer: self.to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 32])
    }

    async fn expect_connected(swarm: &mut MemSwarm) -> (PeerId, Arc<dyn PeerLink>) {
        match swarm.next_event().await {
            Some(SwarmEvent::PeerConnected { peer, link }) => (peer, link),
            other => panic!("expected PeerConnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_connects_both_members() {
        let net = MemNet::new();
        let mut a = net.endpoint(peer(1));
        let mut b = net.endpoint(peer(2));
        let topic = Topic::derive("test", b"room");

        a.join(topic, JoinMode::BOTH).await.unwrap();
        b.join(topic, JoinMode::BOTH).await.unwrap();

        let (from_a, _) = expect_connected(&mut a).await;
        let (from_b, _) = expect_connected(&mut b).await;
        assert_eq!(from_a, peer(2));
        assert_eq!(from_b, peer(1));
    }

    #[tokio::test]
    async fn lookup_does_not_connect_to_lookup() {
        let net = MemNet::new();
        let mut a = net.endpoint(peer(1));
        let mut b = net.endpoint(peer(2));
        let mut server = net.endpoint(peer(3));
        let topic = Topic::derive("test", b"rendezvous");

        a.join(topic, JoinMode::LOOKUP).await.unwrap();
        b.join(topic, JoinMode::LOOKUP).await.unwrap();
        server.join(topic, JoinMode::ANNOUNCE).await.unwrap();

        // Both clients connect to the announcer, not to each other.
        let (seen_a, _) = expect_connected(&mut a).await;
        let (seen_b, _) = expect_connected(&mut b).await;
        assert_eq!(seen_a, peer(3));
        assert_eq!(seen_b, peer(3));

        let (s1, _) = expect_connected(&mut server).await;
        let (s2, _) = expect_connected(&mut server).await;
        let mut got = [s1, s2];
        got.sort();
        assert_eq!(got, [peer(1), peer(2)]);
    }

    #[tokio::test]
    async fn shared_second_topic_does_not_duplicate_connection() {
        let net = MemNet::new();
        let mut a = net.endpoint(peer(1));
        let mut b = net.endpoint(peer(2));
        let t1 = Topic::derive("test", b"one");
        let t2 = Topic::derive("test", b"two");

        a.join(t1, JoinMode::BOTH).await.unwrap();
        a.join(t2, JoinMode::BOTH).await.unwrap();
        b.join(t1, JoinMode::BOTH).await.unwrap();
        b.join(t2, JoinMode::BOTH).await.unwrap();

        expect_connected(&mut a).await;
        // No second PeerConnected pending: the next event would only be
        // a frame, so send one and check it arrives first.
        let (_, link) = expect_connected(&mut b).await;
        link.send(Bytes::from_static(b"hi")).await.unwrap();
        match a.next_event().await {
            Some(SwarmEvent::Frame { peer: from, payload }) => {
                assert_eq!(from, peer(2));
                assert_eq!(&payload[..], b"hi");
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_preserve_order() {
        let net = MemNet::new();
        let mut a = net.endpoint(peer(1));
        let mut b = net.endpoint(peer(2));
        let topic = Topic::derive("test", b"ordered");
        a.join(topic, JoinMode::BOTH).await.unwrap();
        b.join(topic, JoinMode::BOTH).await.unwrap();
        expect_connected(&mut a).await;
        let (_, link) = expect_connected(&mut b).await;

        for i in 0..10u8 {
            link.send(Bytes::copy_from_slice(&[i])).await.unwrap();
        }
        for i in 0..10u8 {
            match a.next_event().await {
                Some(SwarmEvent::Frame { payload, .. }) => assert_eq!(payload[0], i),
                other => panic!("expected Frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn drop_disconnects_and_fails_link() {
        let net = MemNet::new();
        let mut a = net.endpoint(peer(1));
        let b = net.endpoint(peer(2));
        let topic = Topic::derive("test", b"drop");
        a.join(topic, JoinMode::BOTH).await.unwrap();
        {
            let mut b = b;
            b.join(topic, JoinMode::BOTH).await.unwrap();
            expect_connected(&mut b).await;
        } // b dropped here

        let (seen, link) = expect_connected(&mut a).await;
        assert_eq!(seen, peer(2));
        match a.next_event().await {
            Some(SwarmEvent::PeerDisconnected { peer: gone }) => assert_eq!(gone, peer(2)),
            other => panic!("expected PeerDisconnected, got {other:?}"),
        }
        assert!(link.send(Bytes::from_static(b"late")).await.is_err());
    }
}
