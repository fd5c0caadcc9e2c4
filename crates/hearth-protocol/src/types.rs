use serde::{Deserialize, Serialize};

pub use hearth_transport::PeerId;
use hearth_transport::Topic;

/// Domain label for room rendezvous topics.
const ROOM_TOPIC_LABEL: &str = "hearth/room/v1";

/// Domain label for the well-known root-peer rendezvous topic.
const ROOT_TOPIC_LABEL: &str = "hearth/root-rendezvous/v1";

/// Name of a chat room.
///
/// Doubles as the key material for the room's rendezvous topic and as
/// the room identifier in wire envelopes and the root ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rendezvous topic where this room's members find each other.
    pub fn topic(&self) -> Topic {
        Topic::derive(ROOM_TOPIC_LABEL, self.0.as_bytes())
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The well-known topic where the root peer announces itself.
pub fn root_rendezvous_topic() -> Topic {
    Topic::derive(ROOT_TOPIC_LABEL, b"")
}

/// Application-visible message body, exchanged verbatim between peers
/// and stored verbatim by the root ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    /// Sender's self-reported display name.
    pub sender: String,
    pub text: String,
    /// Unix ms at composition time.
    pub sent_at: u64,
}

/// A message surfaced to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Transport identity of the original sender.
    pub from: PeerId,
    /// Known for historical replays; live chat frames carry no room.
    pub room: Option<RoomName>,
    pub body: ChatBody,
    /// True when the message was replayed from the root ledger.
    pub from_sync: bool,
    /// Unix ms at receipt.
    pub received_at: u64,
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}
