//! Error types for the registry, handles and transports.

use thiserror::Error;

/// Errors from registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another live connection already holds this identity.
    #[error("identity already connected: {0}")]
    DuplicateIdentity(String),
}

/// Per-handle delivery failure. Isolated to that handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The outbound queue is full; the peer is not keeping up.
    #[error("outbound queue full")]
    QueueFull,
    /// The session owning the handle has stopped draining it.
    #[error("connection closed")]
    Closed,
}

/// Failures surfaced by a [`Transport`](crate::session::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Clean close by the peer. The expected end of a session.
    #[error("peer disconnected")]
    Disconnected,
    /// Anything else the transport reports.
    #[error("transport error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this is the expected, clean end of a session.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}
