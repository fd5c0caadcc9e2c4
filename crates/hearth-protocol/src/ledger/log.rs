/// The append-only-log collaborator contract and its implementations.
///
/// Indices are zero-based, contiguous, and assigned by append order —
/// that invariant is the ledger's foundation, so both implementations
/// enforce it structurally (an index is only ever the current length).
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension};

use crate::error::HearthProtocolError;
use crate::types::RoomName;

/// A durable, index-addressable, append-only byte log.
pub trait AppendLog: Send {
    /// Append one record, returning its index.
    fn append(&mut self, payload: &[u8]) -> Result<u64, HearthProtocolError>;

    /// Read the record at `index`, `None` past the end.
    fn get(&self, index: u64) -> Result<Option<Vec<u8>>, HearthProtocolError>;

    /// Number of records (== next index to be assigned).
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens per-room logs under some storage root.
pub trait LogStore: Send {
    fn open(&self, room: &RoomName) -> Result<Box<dyn AppendLog>, HearthProtocolError>;

    /// Rooms with a log already present in storage. Lets the ledger
    /// recover rooms even when the metadata record was lost.
    fn existing_rooms(&self) -> Result<Vec<RoomName>, HearthProtocolError>;
}

// ── SQLite (durable) ───────────────────────────────────────────────────

/// One SQLite file per room, named by the hex of the room name so
/// arbitrary room names stay filesystem-safe and recoverable.
pub struct SqliteLogStore {
    dir: PathBuf,
}

impl SqliteLogStore {
    /// Create the store, making the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, HearthProtocolError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| HearthProtocolError::Storage(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, room: &RoomName) -> PathBuf {
        self.dir.join(format!("{}.db", hex::encode(room.as_str())))
    }
}

impl LogStore for SqliteLogStore {
    fn open(&self, room: &RoomName) -> Result<Box<dyn AppendLog>, HearthProtocolError> {
        Ok(Box::new(SqliteLog::open(&self.path_for(room))?))
    }

    fn existing_rooms(&self) -> Result<Vec<RoomName>, HearthProtocolError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| HearthProtocolError::Storage(format!("read {}: {e}", self.dir.display())))?;
        let mut rooms = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HearthProtocolError::Storage(e.to_string()))?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".db")) else {
                continue;
            };
            // Foreign files in the directory are not ours to touch.
            let Ok(raw) = hex::decode(stem) else { continue };
            let Ok(room) = String::from_utf8(raw) else { continue };
            rooms.push(RoomName::new(room));
        }
        rooms.sort();
        Ok(rooms)
    }
}

/// SQLite-backed append log for one room.
pub struct SqliteLog {
    conn: Connection,
    next_index: u64,
}

impl SqliteLog {
    pub fn open(path: &Path) -> Result<Self, HearthProtocolError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                 idx     INTEGER PRIMARY KEY,
                 payload BLOB NOT NULL
             );",
        )?;
        // Indices are contiguous from 0, so the count is the next index.
        let next_index: u64 =
            conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(Self { conn, next_index })
    }
}

impl AppendLog for SqliteLog {
    fn append(&mut self, payload: &[u8]) -> Result<u64, HearthProtocolError> {
        let index = self.next_index;
        self.conn.execute(
            "INSERT INTO entries (idx, payload) VALUES (?1, ?2)",
            rusqlite::params![index, payload],
        )?;
        self.next_index += 1;
        Ok(index)
    }

    fn get(&self, index: u64) -> Result<Option<Vec<u8>>, HearthProtocolError> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM entries WHERE idx = ?1",
                rusqlite::params![index],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn len(&self) -> u64 {
        self.next_index
    }
}

// ── In-memory (tests) ──────────────────────────────────────────────────

/// Shared in-memory store. Clones see the same logs, so a "restarted"
/// ledger opened over a clone keeps its data.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    rooms: Arc<Mutex<HashMap<RoomName, Arc<Mutex<Vec<Vec<u8>>>>>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn open(&self, room: &RoomName) -> Result<Box<dyn AppendLog>, HearthProtocolError> {
        let entries = Arc::clone(
            self.rooms
                .lock()
                .unwrap()
                .entry(room.clone())
                .or_default(),
        );
        Ok(Box::new(MemoryLog { entries }))
    }

    fn existing_rooms(&self) -> Result<Vec<RoomName>, HearthProtocolError> {
        let mut rooms: Vec<RoomName> = self.rooms.lock().unwrap().keys().cloned().collect();
        rooms.sort();
        Ok(rooms)
    }
}

pub struct MemoryLog {
    entries: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl AppendLog for MemoryLog {
    fn append(&mut self, payload: &[u8]) -> Result<u64, HearthProtocolError> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(payload.to_vec());
        Ok(entries.len() as u64 - 1)
    }

    fn get(&self, index: u64) -> Result<Option<Vec<u8>>, HearthProtocolError> {
        Ok(self.entries.lock().unwrap().get(index as usize).cloned())
    }

    fn len(&self) -> u64 {
        self.entries.lock().unwrap().len() as u64
    }
}
