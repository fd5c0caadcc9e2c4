use crate::PeerId;

/// Errors surfaced by a transport collaborator.
#[derive(Debug, thiserror::Error)]
pub enum HearthTransportError {
    #[error("failed to join topic: {0}")]
    Join(String),

    #[error("send to {peer} failed: {reason}")]
    Send { peer: PeerId, reason: String },

    #[error("connection to {peer} closed")]
    ConnectionClosed { peer: PeerId },

    #[error("swarm is shut down")]
    Shutdown,

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
}
