//! Tamper-evident log of lifecycle actions.
//!
//! Every registry mutation appends an event whose hash covers the
//! event fields and the hash of the previous event. Rewriting history
//! breaks the chain, which [`AuditLog::verify_integrity`] detects.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::record::ExperimentId;

/// What happened to an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Record registered.
    Created,
    /// Record opened for work.
    Opened,
    /// Record finalized; manifest pinned.
    Finalized,
    /// Record removed after a failed creation.
    RolledBack,
}

impl AuditAction {
    fn tag(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::Opened => 2,
            Self::Finalized => 3,
            Self::RolledBack => 4,
        }
    }
}

/// One entry in the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub event_id: Uuid,
    /// Epoch milliseconds when the event was recorded.
    pub recorded_at_ms: i64,
    /// Experiment the event concerns.
    pub experiment_id: ExperimentId,
    /// The lifecycle action taken.
    pub action: AuditAction,
    /// Free-form context, such as the location or manifest path.
    pub detail: String,
    /// Hash of the previous event, all zeros for the first.
    pub prev_hash: [u8; 32],
    /// Hash of this event's fields and `prev_hash`.
    pub hash: [u8; 32],
}

/// Append-only, hash-chained event log.
#[derive(Debug, Default)]
pub struct AuditLog {
    inner: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    /// Appends an event, chaining it to the previous one.
    pub fn record(
        &self,
        experiment_id: ExperimentId,
        action: AuditAction,
        detail: impl Into<String>,
    ) -> Uuid {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let mut event = AuditEvent {
            event_id: Uuid::new_v4(),
            recorded_at_ms: Utc::now().timestamp_millis(),
            experiment_id,
            action,
            detail: detail.into(),
            prev_hash,
            hash: [0u8; 32],
        };
        event.hash = chain_hash(&event);
        let id = event.event_id;
        guard.push(event);
        id
    }

    /// Snapshot of all events in append order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Walks the chain and checks every link and every event hash.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::BrokenChain`] with the index of the first
    /// event that fails its check.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for (index, event) in guard.iter().enumerate() {
            if event.prev_hash != prev || event.hash != chain_hash(event) {
                return Err(AuditError::BrokenChain { index });
            }
            prev = event.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    fn inject(&self, event: AuditEvent) {
        self.inner.lock().push(event);
    }
}

fn chain_hash(event: &AuditEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.event_id.as_bytes());
    hasher.update(event.recorded_at_ms.to_le_bytes());
    hasher.update(event.experiment_id.0.to_bytes());
    hasher.update([event.action.tag()]);
    hasher.update(event.detail.as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash);
    hasher.finalize().into()
}

/// Errors from audit chain verification.
#[derive(Debug, Error)]
pub enum AuditError {
    /// An event's link or hash does not check out.
    #[error("audit chain broken at event {index}")]
    BrokenChain {
        /// Index of the first bad event.
        index: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_chain_in_order() {
        let log = AuditLog::default();
        let id = ExperimentId::new();
        log.record(id, AuditAction::Created, "/lab/a");
        log.record(id, AuditAction::Opened, "");
        log.record(id, AuditAction::Finalized, "/lab/a/manifest.json");

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].prev_hash, [0u8; 32]);
        assert_eq!(events[1].prev_hash, events[0].hash);
        assert_eq!(events[2].prev_hash, events[1].hash);
        log.verify_integrity().unwrap();
    }

    #[test]
    fn tampered_event_breaks_the_chain() {
        let log = AuditLog::default();
        let id = ExperimentId::new();
        log.record(id, AuditAction::Created, "/lab/a");

        let mut forged = log.events()[0].clone();
        forged.detail = "/lab/forged".into();
        // Hash not recomputed: this models an in-place edit.
        log.inject(forged);

        let err = log.verify_integrity().unwrap_err();
        assert!(matches!(err, AuditError::BrokenChain { index: 1 }));
    }

    #[test]
    fn empty_log_verifies() {
        let log = AuditLog::default();
        assert!(log.is_empty());
        log.verify_integrity().unwrap();
    }
}
