/// Restart durability: the root's ledger and room records survive a
/// process restart, and a fresh client catches up afterwards.
use std::time::Duration;

use hearth_protocol::{
    ChatBody, KeyPair, PeerId, ProtocolEvent, Runtime, RuntimeChannels, RuntimeConfig, RoomName,
};
use hearth_transport::mem::MemNet;

fn peer(seed: u8) -> PeerId {
    PeerId::from_bytes([seed; 32])
}

fn body(text: &str) -> ChatBody {
    ChatBody {
        sender: "alice".into(),
        text: text.into(),
        sent_at: 1708000000000,
    }
}

async fn next_event(channels: &mut RuntimeChannels) -> ProtocolEvent {
    tokio::time::timeout(Duration::from_secs(5), channels.events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("runtime closed")
}

async fn wait_for(
    channels: &mut RuntimeChannels,
    mut pred: impl FnMut(&ProtocolEvent) -> bool,
) -> ProtocolEvent {
    loop {
        let event = next_event(channels).await;
        if pred(&event) {
            return event;
        }
    }
}

async fn spawn_root(net: &MemNet, data_dir: &std::path::Path) -> RuntimeChannels {
    Runtime::spawn(
        net.endpoint(peer(9)),
        KeyPair::from_secret_bytes([9; 32]),
        RuntimeConfig {
            display_name: "root".into(),
            data_dir: Some(data_dir.to_path_buf()),
            flush_every: 2,
            ..RuntimeConfig::default()
        },
    )
    .await
    .unwrap()
}

async fn spawn_member(net: &MemNet, seed: u8, name: &str) -> RuntimeChannels {
    Runtime::spawn(
        net.endpoint(peer(seed)),
        KeyPair::from_secret_bytes([seed; 32]),
        RuntimeConfig {
            display_name: name.to_string(),
            rooms: vec![RoomName::from("general")],
            ..RuntimeConfig::default()
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn ledger_survives_root_restart() {
    let data_dir = tempfile::tempdir().unwrap();

    // ── Phase 1: store three messages, then stop the root ──────────────
    {
        let net = MemNet::new();
        let mut root = spawn_root(&net, data_dir.path()).await;
        let mut alice = spawn_member(&net, 1, "alice").await;
        wait_for(&mut alice, |e| matches!(e, ProtocolEvent::RootPeerDiscovered { .. })).await;

        for i in 0..3 {
            let report = alice
                .handle
                .broadcast("general".into(), body(&format!("msg {i}")))
                .await
                .unwrap();
            assert_eq!(report.root_peer_count, 1);
        }

        // Prove the root appended everything before stopping it: a
        // resync must come back with all three entries.
        alice.handle.resync().await;
        wait_for(
            &mut alice,
            |e| matches!(e, ProtocolEvent::SyncCompleted { next_index: 3, .. }),
        )
        .await;

        // Shut down and wait for the loop (and its ledger flush) to finish.
        root.handle.shutdown().await;
        while root.events.recv().await.is_some() {}
    }

    // ── Phase 2: restart over the same directory ───────────────────────
    {
        let net = MemNet::new();
        let _root = spawn_root(&net, data_dir.path()).await;
        let mut dave = spawn_member(&net, 4, "dave").await;

        let mut texts = Vec::new();
        while texts.len() < 3 {
            if let ProtocolEvent::MessageReceived(msg) = next_event(&mut dave).await {
                assert!(msg.from_sync);
                assert_eq!(msg.from, peer(1), "replay keeps the original sender");
                assert_eq!(msg.room, Some("general".into()));
                texts.push(msg.body.text);
            }
        }
        assert_eq!(texts, ["msg 0", "msg 1", "msg 2"]);
        wait_for(
            &mut dave,
            |e| matches!(e, ProtocolEvent::SyncCompleted { next_index: 3, .. }),
        )
        .await;
    }
}

#[tokio::test]
async fn client_resumes_sync_from_last_seen_index() {
    let data_dir = tempfile::tempdir().unwrap();
    let net = MemNet::new();
    let _root = spawn_root(&net, data_dir.path()).await;

    let mut alice = spawn_member(&net, 1, "alice").await;
    wait_for(&mut alice, |e| matches!(e, ProtocolEvent::RootPeerDiscovered { .. })).await;

    // Two messages, then a full catch-up to index 2.
    for i in 0..2 {
        alice
            .handle
            .broadcast("general".into(), body(&format!("early {i}")))
            .await
            .unwrap();
    }
    alice.handle.resync().await;
    wait_for(
        &mut alice,
        |e| matches!(e, ProtocolEvent::SyncCompleted { next_index: 2, .. }),
    )
    .await;

    // One more message; the next resync replays only the new entry.
    alice
        .handle
        .broadcast("general".into(), body("late"))
        .await
        .unwrap();
    alice.handle.resync().await;

    let event = wait_for(&mut alice, |e| {
        matches!(e, ProtocolEvent::MessageReceived(m) if m.from_sync)
    })
    .await;
    let ProtocolEvent::MessageReceived(msg) = event else { unreachable!() };
    assert_eq!(msg.body.text, "late");
    wait_for(
        &mut alice,
        |e| matches!(e, ProtocolEvent::SyncCompleted { next_index: 3, .. }),
    )
    .await;
}
