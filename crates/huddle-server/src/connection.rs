//! Connection handle: one participant's outbound side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::SendError;

/// Represents one connected participant.
///
/// The registry holds an `Arc` to this so it can enqueue events; the session
/// that created it owns the receiving half of the queue and the transport.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection ID.
    pub id: String,
    /// Participant identity, immutable for the connection's lifetime.
    identity: String,
    /// Send channel drained by the owning session.
    tx: mpsc::Sender<Arc<str>>,
    /// Cancelled when the registry evicts this handle.
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Count of messages dropped due to full or closed channel.
    dropped_messages: AtomicU64,
}

impl ConnectionHandle {
    /// Create a handle and the queue receiver its session must drain.
    pub fn new(identity: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: format!("conn_{}", Uuid::now_v7()),
            identity: identity.into(),
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        };
        (handle, rx)
    }

    /// Participant identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Enqueue a serialized event without waiting.
    pub fn send(&self, message: Arc<str>) -> Result<(), SendError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(match err {
                    mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => SendError::Closed,
                })
            }
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the owning session to close. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the handle has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_handle() {
        let (handle, _rx) = ConnectionHandle::new("alice", 8);
        assert_eq!(handle.identity(), "alice");
        assert!(handle.id.starts_with("conn_"));
        assert!(!handle.is_closed());
        assert_eq!(handle.drop_count(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let (a, _rx_a) = ConnectionHandle::new("alice", 8);
        let (b, _rx_b) = ConnectionHandle::new("alice", 8);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (handle, mut rx) = ConnectionHandle::new("alice", 8);
        handle.send(Arc::from("hello")).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn send_to_closed_channel_fails() {
        let (handle, rx) = ConnectionHandle::new("alice", 8);
        drop(rx);
        assert_eq!(handle.send(Arc::from("hello")), Err(SendError::Closed));
        assert_eq!(handle.drop_count(), 1);
    }

    #[test]
    fn send_to_full_channel_fails() {
        let (handle, _rx) = ConnectionHandle::new("alice", 1);
        handle.send(Arc::from("msg1")).unwrap();
        assert_eq!(handle.send(Arc::from("msg2")), Err(SendError::QueueFull));
        assert_eq!(handle.drop_count(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (handle, _rx) = ConnectionHandle::new("alice", 0);
        assert!(handle.send(Arc::from("one")).is_ok());
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (handle, mut rx) = ConnectionHandle::new("alice", 8);
        for i in 0..5 {
            handle.send(Arc::from(format!("msg_{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), format!("msg_{i}"));
        }
    }

    #[tokio::test]
    async fn close_resolves_waiters() {
        let (handle, _rx) = ConnectionHandle::new("alice", 8);
        let handle = Arc::new(handle);
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.closed().await })
        };
        handle.close();
        handle.close();
        waiter.await.unwrap();
        assert!(handle.is_closed());
    }
}
