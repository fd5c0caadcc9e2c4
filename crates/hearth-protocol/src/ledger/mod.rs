/// Ledger module — the root peer's durable per-room message store.
///
/// Two layers:
/// - **Log**: the append-only-log collaborator contract
///   (`append -> index`, `get(index)`, `len`) with a SQLite-backed
///   durable implementation and an in-memory test double.
/// - **Store**: `RoomLedger`, which owns one open log per room plus
///   the persisted room metadata record, and survives restarts.
pub mod log;
pub mod store;

pub use log::{AppendLog, LogStore, MemoryLogStore, SqliteLogStore};
pub use store::{RoomLedger, RoomRecord};
