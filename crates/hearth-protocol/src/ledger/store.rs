/// RoomLedger — durable, append-only, index-addressable message log
/// per room, plus the restart-safe room metadata record.
///
/// A room is Unknown until its first `register-room` or
/// `store-message`, then Open for the rest of the process lifetime.
/// Rooms are never closed or deleted. Metadata is advisory: every
/// count is recomputed from the underlying log on open, so losing the
/// metadata file loses nothing but timestamps.
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::envelope::StoredMessage;
use crate::error::HearthProtocolError;
use crate::ledger::log::{AppendLog, LogStore};
use crate::types::{ChatBody, PeerId, RoomName};

/// Persisted per-room bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room: RoomName,
    /// Always equals the underlying log's length.
    pub message_count: u64,
    pub created_at: u64,
    pub last_activity: u64,
}

/// The single persisted metadata record.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaState {
    rooms: BTreeMap<RoomName, RoomRecord>,
    total_messages: u64,
}

/// One ledger entry as stored in the log (index is positional).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    message: ChatBody,
    stored_at: u64,
    from_peer: PeerId,
}

struct OpenRoom {
    log: Box<dyn AppendLog>,
    record: RoomRecord,
}

pub struct RoomLedger {
    store: Box<dyn LogStore>,
    meta_path: PathBuf,
    /// Metadata is rewritten after this many appends (and on shutdown).
    flush_every: u32,
    rooms: BTreeMap<RoomName, OpenRoom>,
    total_messages: u64,
    appends_since_flush: u32,
}

impl RoomLedger {
    /// Open the ledger: load persisted metadata and eagerly re-open
    /// every known room, so no sync request can race a
    /// not-yet-reopened room. Rooms found on disk but missing from the
    /// metadata record are recovered and their counts rebuilt.
    pub fn open(
        store: Box<dyn LogStore>,
        meta_path: PathBuf,
        flush_every: u32,
        now: u64,
    ) -> Result<Self, HearthProtocolError> {
        let meta = load_meta(&meta_path);

        let mut known: BTreeSet<RoomName> = meta.rooms.keys().cloned().collect();
        known.extend(store.existing_rooms()?);

        let mut ledger = Self {
            store,
            meta_path,
            flush_every: flush_every.max(1),
            rooms: BTreeMap::new(),
            total_messages: 0,
            appends_since_flush: 0,
        };
        for room in known {
            let log = ledger.store.open(&room)?;
            let length = log.len();
            let record = match meta.rooms.get(&room) {
                Some(record) => RoomRecord {
                    // The log is authoritative for counts.
                    message_count: length,
                    ..record.clone()
                },
                None => rebuild_record(&room, log.as_ref(), now)?,
            };
            ledger.total_messages += length;
            ledger.rooms.insert(room, OpenRoom { log, record });
        }
        Ok(ledger)
    }

    /// Open a room's log, creating it on first sight. Idempotent.
    pub fn ensure_open(&mut self, room: &RoomName, now: u64) -> Result<(), HearthProtocolError> {
        if self.rooms.contains_key(room) {
            return Ok(());
        }
        let log = self.store.open(room)?;
        let length = log.len();
        let record = RoomRecord {
            room: room.clone(),
            message_count: length,
            created_at: now,
            last_activity: now,
        };
        self.total_messages += length;
        self.rooms.insert(room.clone(), OpenRoom { log, record });
        tracing::info!("ledger: opened room {room}");
        Ok(())
    }

    /// Append one message to a room's ledger, returning its index.
    /// A storage failure is scoped to this call — nothing else breaks.
    pub fn append(
        &mut self,
        room: &RoomName,
        message: &ChatBody,
        from_peer: PeerId,
        now: u64,
    ) -> Result<u64, HearthProtocolError> {
        self.ensure_open(room, now)?;
        let payload = serde_json::to_vec(&StoredRecord {
            message: message.clone(),
            stored_at: now,
            from_peer,
        })?;
        let open = self
            .rooms
            .get_mut(room)
            .expect("room opened just above");
        let index = open.log.append(&payload)?;
        open.record.message_count = open.log.len();
        open.record.last_activity = now;
        self.total_messages += 1;

        self.appends_since_flush += 1;
        if self.appends_since_flush >= self.flush_every {
            if let Err(e) = self.flush() {
                tracing::warn!("ledger: metadata flush failed: {e}");
            }
        }
        Ok(index)
    }

    /// The contiguous ordered run of entries with `index >= from`.
    /// An unknown room yields an empty slice, not an error — it is
    /// observably identical to a registered room with no messages.
    pub fn slice(
        &self,
        room: &RoomName,
        from: u64,
    ) -> Result<Vec<StoredMessage>, HearthProtocolError> {
        let Some(open) = self.rooms.get(room) else {
            return Ok(Vec::new());
        };
        let mut messages = Vec::new();
        for index in from..open.log.len() {
            let payload = open.log.get(index)?.ok_or_else(|| {
                HearthProtocolError::Storage(format!("room {room}: missing entry {index}"))
            })?;
            let record: StoredRecord = serde_json::from_slice(&payload)?;
            messages.push(StoredMessage {
                index,
                message: record.message,
                stored_at: record.stored_at,
                from_peer: record.from_peer,
            });
        }
        Ok(messages)
    }

    /// Ledger length for a room (0 if unknown).
    pub fn len(&self, room: &RoomName) -> u64 {
        self.rooms.get(room).map(|open| open.log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn record(&self, room: &RoomName) -> Option<&RoomRecord> {
        self.rooms.get(room).map(|open| &open.record)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomRecord> {
        self.rooms.values().map(|open| &open.record)
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    /// Rewrite the persisted metadata record (atomically: temp file,
    /// then rename).
    pub fn flush(&mut self) -> Result<(), HearthProtocolError> {
        let meta = MetaState {
            rooms: self
                .rooms
                .iter()
                .map(|(room, open)| (room.clone(), open.record.clone()))
                .collect(),
            total_messages: self.total_messages,
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        let tmp = self.meta_path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| HearthProtocolError::Storage(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.meta_path).map_err(|e| {
            HearthProtocolError::Storage(format!("rename {}: {e}", self.meta_path.display()))
        })?;
        self.appends_since_flush = 0;
        Ok(())
    }
}

/// Read the metadata record, tolerating absence and corruption — the
/// logs rebuild everything that matters.
fn load_meta(path: &std::path::Path) -> MetaState {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("ledger: metadata unreadable, rebuilding from logs: {e}");
                MetaState::default()
            }
        },
        Err(_) => MetaState::default(),
    }
}

/// Reconstruct a room record from its log when metadata is missing.
fn rebuild_record(
    room: &RoomName,
    log: &dyn AppendLog,
    now: u64,
) -> Result<RoomRecord, HearthProtocolError> {
    let length = log.len();
    let timestamp_of = |index: u64| -> Result<Option<u64>, HearthProtocolError> {
        match log.get(index)? {
            Some(payload) => {
                let record: StoredRecord = serde_json::from_slice(&payload)?;
                Ok(Some(record.stored_at))
            }
            None => Ok(None),
        }
    };
    let created_at = if length > 0 { timestamp_of(0)?.unwrap_or(now) } else { now };
    let last_activity = if length > 0 {
        timestamp_of(length - 1)?.unwrap_or(created_at)
    } else {
        created_at
    };
    Ok(RoomRecord {
        room: room.clone(),
        message_count: length,
        created_at,
        last_activity,
    })
}
