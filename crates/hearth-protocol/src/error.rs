/// Protocol-level errors for Hearth.
///
/// Maps the layer's failure taxonomy: protocol errors are dropped at
/// the router, crypto errors discard one message, connection errors
/// remove one peer, storage errors are scoped to one ledger call.
use hearth_transport::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum HearthProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] hearth_transport::HearthTransportError),

    #[error("duplicate connection for peer {peer}")]
    DuplicateConnection { peer: PeerId },

    #[error("malformed envelope: {reason}")]
    Protocol { reason: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("runtime is shut down")]
    Shutdown,
}

impl From<serde_json::Error> for HearthProtocolError {
    fn from(e: serde_json::Error) -> Self {
        HearthProtocolError::Protocol { reason: e.to_string() }
    }
}

impl From<rusqlite::Error> for HearthProtocolError {
    fn from(e: rusqlite::Error) -> Self {
        HearthProtocolError::Storage(e.to_string())
    }
}
