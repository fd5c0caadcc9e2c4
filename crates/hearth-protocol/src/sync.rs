/// Client side of the root sync protocol.
///
/// Tracks, per room, the next ledger index this node still needs, and
/// which rooms have a sync request in flight. Pure logic, no I/O —
/// the router turns its decisions into outbound envelopes.
///
/// The wire `lastIndex` means "send everything at or after this
/// index", so the tracker stores the next needed index (highest
/// observed + 1, 0 initially): requests never re-fetch entries that
/// already arrived, and repeating a request with no intervening
/// appends yields an identical (empty) answer.
use std::collections::HashMap;
use std::time::Duration;

use crate::envelope::{Envelope, StoredMessage};
use crate::types::RoomName;

#[derive(Debug, Default)]
struct RoomSync {
    /// Next ledger index we need (== highest synced + 1).
    next_index: u64,
    /// Unix ms when the in-flight request was issued, if any.
    pending_since: Option<u64>,
}

/// Result of applying one sync response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Number of replayed messages in the response.
    pub accepted: usize,
    /// The room's next needed index after the response.
    pub next_index: u64,
}

pub struct SyncTracker {
    rooms: HashMap<RoomName, RoomSync>,
    timeout_ms: u64,
}

impl SyncTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Start caring about a room's history. Idempotent.
    pub fn track(&mut self, room: RoomName) {
        self.rooms.entry(room).or_default();
    }

    /// Rooms this node currently cares about, in stable order.
    pub fn rooms(&self) -> Vec<RoomName> {
        let mut rooms: Vec<RoomName> = self.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// The next ledger index needed for a room (0 if unknown).
    pub fn next_index(&self, room: &RoomName) -> u64 {
        self.rooms.get(room).map(|r| r.next_index).unwrap_or(0)
    }

    /// Whether a request is currently in flight for this room.
    pub fn is_pending(&self, room: &RoomName, now: u64) -> bool {
        self.rooms
            .get(room)
            .and_then(|r| r.pending_since)
            .is_some_and(|since| now.saturating_sub(since) < self.timeout_ms)
    }

    /// Build the sync request for a room and mark it in flight.
    pub fn begin_request(&mut self, room: &RoomName, now: u64) -> Envelope {
        let state = self.rooms.entry(room.clone()).or_default();
        state.pending_since = Some(now);
        Envelope::SyncRequest {
            room: room.clone(),
            last_index: state.next_index,
        }
    }

    /// Apply a sync response: clear the in-flight marker and advance
    /// past the highest index observed.
    pub fn apply_response(&mut self, room: &RoomName, messages: &[StoredMessage]) -> SyncOutcome {
        let state = self.rooms.entry(room.clone()).or_default();
        state.pending_since = None;
        if let Some(highest) = messages.iter().map(|m| m.index).max() {
            state.next_index = state.next_index.max(highest + 1);
        }
        SyncOutcome {
            accepted: messages.len(),
            next_index: state.next_index,
        }
    }

    /// Clear requests that have been in flight longer than the
    /// timeout. Returns the affected rooms so the caller can re-issue.
    pub fn expire(&mut self, now: u64) -> Vec<RoomName> {
        let mut expired: Vec<RoomName> = self
            .rooms
            .iter()
            .filter(|(_, state)| {
                state
                    .pending_since
                    .is_some_and(|since| now.saturating_sub(since) >= self.timeout_ms)
            })
            .map(|(room, _)| room.clone())
            .collect();
        expired.sort();
        for room in &expired {
            if let Some(state) = self.rooms.get_mut(room) {
                state.pending_since = None;
            }
        }
        expired
    }
}
