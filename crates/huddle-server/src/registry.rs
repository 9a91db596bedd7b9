//! Participant registry: who is connected, and fan-out to all of them.
//!
//! Every operation runs inside one registry-wide critical section. Sends are
//! non-blocking queue pushes, so the lock is never held across an await and
//! a slow peer cannot stall registration of unrelated peers. Membership
//! changes broadcast the roster from inside the same critical section that
//! made them, so every observer sees roster updates in mutation order.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::errors::{RegistryError, SendError};
use crate::events::OutboundEvent;
use crate::metrics::{BROADCAST_EVICTIONS_TOTAL, REGISTRY_REJECTIONS_TOTAL, WS_CONNECTIONS_ACTIVE};

type Participants = HashMap<String, Arc<ConnectionHandle>>;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Handles the event was queued on.
    pub delivered: usize,
    /// Handles whose send failed and were removed.
    pub evicted: usize,
}

/// Identity → connection mapping with serialized mutation and fan-out.
pub struct Registry {
    participants: Mutex<Participants>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            participants: Mutex::new(HashMap::new()),
        }
    }

    /// Add a participant under the handle's identity and announce the roster.
    ///
    /// Fails with [`RegistryError::DuplicateIdentity`] if the identity is
    /// already live; the existing handle is left untouched.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Result<(), RegistryError> {
        let mut participants = self.participants.lock();
        let identity = handle.identity().to_owned();
        if participants.contains_key(&identity) {
            counter!(REGISTRY_REJECTIONS_TOTAL, "reason" => "duplicate_identity").increment(1);
            return Err(RegistryError::DuplicateIdentity(identity));
        }

        info!(%identity, conn_id = %handle.id, "participant registered");
        let _ = participants.insert(identity, handle);
        gauge!(WS_CONNECTIONS_ACTIVE).set(participants.len() as f64);
        let _ = announce_roster(&mut participants);
        Ok(())
    }

    /// Remove a participant by identity. Returns whether anything was removed.
    ///
    /// The removed handle is closed so its session winds down.
    pub fn unregister(&self, identity: &str) -> bool {
        let mut participants = self.participants.lock();
        let Some(handle) = participants.remove(identity) else {
            return false;
        };
        handle.close();
        info!(identity, conn_id = %handle.id, "participant unregistered");
        gauge!(WS_CONNECTIONS_ACTIVE).set(participants.len() as f64);
        let _ = announce_roster(&mut participants);
        true
    }

    /// Remove `handle`'s entry only if the identity still maps to that exact
    /// connection.
    ///
    /// Sessions release through this so that a handle evicted earlier cannot
    /// remove a newer participant who has since taken the same identity.
    pub fn release(&self, handle: &ConnectionHandle) -> bool {
        let mut participants = self.participants.lock();
        let owned = participants
            .get(handle.identity())
            .is_some_and(|current| current.id == handle.id);
        if !owned {
            debug!(identity = handle.identity(), conn_id = %handle.id, "release skipped, entry not owned");
            return false;
        }
        let _ = participants.remove(handle.identity());
        info!(identity = handle.identity(), conn_id = %handle.id, "participant released");
        gauge!(WS_CONNECTIONS_ACTIVE).set(participants.len() as f64);
        let _ = announce_roster(&mut participants);
        true
    }

    /// Queue `event` on every registered handle.
    ///
    /// A failing handle does not affect delivery to the others; it is
    /// evicted and the survivors receive a fresh roster. `evicted` also
    /// counts handles that fail while receiving that roster.
    pub fn broadcast(&self, event: &OutboundEvent) -> BroadcastReport {
        let mut participants = self.participants.lock();
        fan_out(&mut participants, event)
    }

    /// Sorted identities of everyone currently registered.
    pub fn snapshot(&self) -> Vec<String> {
        sorted_identities(&self.participants.lock())
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.participants.lock().len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.participants.lock().is_empty()
    }

    /// Whether `identity` is currently registered.
    pub fn contains(&self, identity: &str) -> bool {
        self.participants.lock().contains_key(identity)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_identities(participants: &Participants) -> Vec<String> {
    let mut identities: Vec<String> = participants.keys().cloned().collect();
    identities.sort_unstable();
    identities
}

fn announce_roster(participants: &mut Participants) -> BroadcastReport {
    let roster = OutboundEvent::roster(sorted_identities(participants));
    fan_out(participants, &roster)
}

/// Caller must hold the registry lock.
fn fan_out(participants: &mut Participants, event: &OutboundEvent) -> BroadcastReport {
    let payload = match event.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(event_type = event.kind(), error = %e, "failed to serialize event");
            return BroadcastReport::default();
        }
    };

    let mut report = BroadcastReport::default();
    let mut failed: Vec<(String, SendError)> = Vec::new();
    for (identity, handle) in participants.iter() {
        match handle.send(payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(err) => failed.push((identity.clone(), err)),
        }
    }
    debug!(
        event_type = event.kind(),
        delivered = report.delivered,
        failed = failed.len(),
        "broadcast event"
    );
    if failed.is_empty() {
        return report;
    }

    report.evicted = failed.len();
    for (identity, err) in failed {
        if let Some(handle) = participants.remove(&identity) {
            warn!(%identity, conn_id = %handle.id, error = %err, "evicting participant after failed send");
            let label = match err {
                SendError::QueueFull => "queue_full",
                SendError::Closed => "closed",
            };
            counter!(BROADCAST_EVICTIONS_TOTAL, "error" => label).increment(1);
            handle.close();
        }
    }
    gauge!(WS_CONNECTIONS_ACTIVE).set(participants.len() as f64);
    // Each pass that fails removes at least one entry, so this terminates.
    report.evicted += announce_roster(participants).evicted;
    report
}
