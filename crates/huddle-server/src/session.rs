//! Session lifecycle. Drives one participant from handshake to close.
//!
//! `Connecting → Registered → Receiving → Closing → Closed`

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::connection::ConnectionHandle;
use crate::errors::TransportError;
use crate::events::OutboundEvent;
use crate::metrics::{
    CHAT_MESSAGES_TOTAL, REGISTRY_REJECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::Registry;

/// Upper bound on sending the close frame to a peer that stopped reading.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// An inbound frame the session cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A chat payload.
    Text(String),
    /// Liveness reply to one of our pings.
    Pong,
}

/// Transport boundary for one accepted connection.
///
/// `receive` is raced against other events, so it must be cancel-safe: a
/// dropped `receive` future must not lose a frame.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next inbound frame. `Err(Disconnected)` on clean close.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;
    /// Write one text frame.
    async fn send(&mut self, text: Arc<str>) -> Result<(), TransportError>;
    /// Write a liveness probe.
    async fn ping(&mut self) -> Result<(), TransportError>;
    /// Close the connection with a reason. Best effort.
    async fn close(&mut self, reason: CloseReason);
}

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake done, identity not yet registered.
    Connecting,
    /// Present in the registry.
    Registered,
    /// In the receive loop.
    Receiving,
    /// Tearing down.
    Closing,
    /// Terminal.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No identity supplied at connect time.
    MissingIdentity,
    /// Identity already held by a live connection.
    DuplicateIdentity,
    /// Peer closed the connection.
    PeerClosed,
    /// Transport failed while receiving or sending.
    TransportError,
    /// The registry dropped this participant.
    Evicted,
    /// No pong within the heartbeat timeout.
    HeartbeatTimeout,
    /// Service is shutting down.
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code (RFC 6455 §7.4.1).
    pub fn code(self) -> u16 {
        match self {
            Self::PeerClosed => 1000,
            Self::HeartbeatTimeout | Self::Shutdown => 1001,
            Self::MissingIdentity | Self::DuplicateIdentity | Self::Evicted => 1008,
            Self::TransportError => 1011,
        }
    }

    /// Short human-readable reason sent in the close frame.
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingIdentity => "missing identity",
            Self::DuplicateIdentity => "identity already connected",
            Self::PeerClosed => "bye",
            Self::TransportError => "transport error",
            Self::Evicted => "removed from roster",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::Shutdown => "server shutting down",
        }
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingIdentity => "missing_identity",
            Self::DuplicateIdentity => "duplicate_identity",
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::Evicted => "evicted",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for each session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Outbound queue depth per participant.
    pub queue_capacity: usize,
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// Close if nothing was heard from the peer for this long.
    pub heartbeat_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            queue_capacity: config.send_queue_capacity,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
        }
    }
}

/// Session lifecycle controller. Cheap to share; one `run` per connection.
#[derive(Clone)]
pub struct Session {
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    config: SessionConfig,
}

impl Session {
    /// Create a controller bound to a registry and the service shutdown token.
    pub fn new(registry: Arc<Registry>, shutdown: CancellationToken, config: SessionConfig) -> Self {
        Self {
            registry,
            shutdown,
            config,
        }
    }

    /// Run a session for an accepted connection until it closes.
    ///
    /// The registry entry, if one was created, is released exactly once
    /// before this returns.
    #[instrument(skip_all, fields(identity = identity.as_deref().unwrap_or_default()))]
    pub async fn run<T: Transport>(&self, mut transport: T, identity: Option<String>) -> CloseReason {
        let mut state = SessionState::Connecting;

        let Some(identity) = identity.filter(|name| !name.is_empty()) else {
            info!("rejecting connection without identity");
            counter!(REGISTRY_REJECTIONS_TOTAL, "reason" => "missing_identity").increment(1);
            return finish_rejected(&mut transport, &mut state, CloseReason::MissingIdentity).await;
        };

        // Upgrades that land after shutdown began must not re-populate the registry
        if self.shutdown.is_cancelled() {
            info!("rejecting connection during shutdown");
            counter!(REGISTRY_REJECTIONS_TOTAL, "reason" => "shutdown").increment(1);
            return finish_rejected(&mut transport, &mut state, CloseReason::Shutdown).await;
        }

        let (handle, mut outbound) = ConnectionHandle::new(identity, self.config.queue_capacity);
        let handle = Arc::new(handle);
        if let Err(e) = self.registry.register(handle.clone()) {
            info!(error = %e, "rejecting connection");
            return finish_rejected(&mut transport, &mut state, CloseReason::DuplicateIdentity).await;
        }
        transition(&mut state, SessionState::Registered);

        let reason = self
            .receive_loop(&mut transport, &handle, &mut outbound, &mut state)
            .await;

        transition(&mut state, SessionState::Closing);
        let _ = self.registry.release(&handle);
        close_within_grace(&mut transport, reason).await;
        transition(&mut state, SessionState::Closed);

        info!(conn_id = %handle.id, %reason, "session closed");
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(handle.age().as_secs_f64());
        reason
    }

    async fn receive_loop<T: Transport>(
        &self,
        transport: &mut T,
        handle: &ConnectionHandle,
        outbound: &mut mpsc::Receiver<Arc<str>>,
        state: &mut SessionState,
    ) -> CloseReason {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = heartbeat.tick().await;
        let mut last_seen = Instant::now();

        transition(state, SessionState::Receiving);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return CloseReason::Shutdown,
                () = handle.closed() => return CloseReason::Evicted,
                inbound = transport.receive() => match inbound {
                    Ok(Inbound::Text(text)) => {
                        last_seen = Instant::now();
                        counter!(CHAT_MESSAGES_TOTAL).increment(1);
                        let report = self
                            .registry
                            .broadcast(&OutboundEvent::chat(handle.identity(), text));
                        debug!(
                            delivered = report.delivered,
                            evicted = report.evicted,
                            "relayed chat message"
                        );
                    }
                    Ok(Inbound::Pong) => last_seen = Instant::now(),
                    Err(e) => return transport_failure(&e),
                },
                Some(payload) = outbound.recv() => {
                    if let Some(reason) = self.write_guarded(handle, transport.send(payload)).await {
                        return reason;
                    }
                }
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > self.config.heartbeat_timeout {
                        warn!(timeout = ?self.config.heartbeat_timeout, "client unresponsive, disconnecting");
                        return CloseReason::HeartbeatTimeout;
                    }
                    if let Some(reason) = self.write_guarded(handle, transport.ping()).await {
                        return reason;
                    }
                }
            }
        }
    }

    /// Await one write while still honouring shutdown and eviction.
    ///
    /// A peer that stops reading can leave a write pending indefinitely, so
    /// the write is also abandoned after the heartbeat timeout.
    async fn write_guarded(
        &self,
        handle: &ConnectionHandle,
        write: impl Future<Output = Result<(), TransportError>>,
    ) -> Option<CloseReason> {
        tokio::select! {
            () = self.shutdown.cancelled() => Some(CloseReason::Shutdown),
            () = handle.closed() => Some(CloseReason::Evicted),
            () = tokio::time::sleep(self.config.heartbeat_timeout) => {
                warn!(timeout = ?self.config.heartbeat_timeout, "write stalled, disconnecting");
                Some(CloseReason::HeartbeatTimeout)
            }
            written = write => written.err().map(|e| transport_failure(&e)),
        }
    }
}

/// Send the close frame, giving up after [`CLOSE_GRACE`].
pub(crate) async fn close_within_grace<T: Transport>(transport: &mut T, reason: CloseReason) {
    if tokio::time::timeout(CLOSE_GRACE, transport.close(reason))
        .await
        .is_err()
    {
        debug!(%reason, "close frame timed out");
    }
}

fn transport_failure(error: &TransportError) -> CloseReason {
    if error.is_disconnect() {
        CloseReason::PeerClosed
    } else {
        warn!(error = %error, "transport failed");
        CloseReason::TransportError
    }
}

async fn finish_rejected<T: Transport>(
    transport: &mut T,
    state: &mut SessionState,
    reason: CloseReason,
) -> CloseReason {
    transition(state, SessionState::Closing);
    close_within_grace(transport, reason).await;
    transition(state, SessionState::Closed);
    reason
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!(from = ?*state, to = ?next, "session state");
    *state = next;
}
