//! Experiment lifecycle registry.
//!
//! Tracks every experiment from registration to completion: a one-way
//! status machine ([`status`]), immutable-once-finalized records
//! ([`record`]), a durable JSON store with atomic writes ([`store`]),
//! and a hash-chained audit trail of every mutation ([`audit`]).

pub mod audit;
pub mod error;
pub mod record;
pub mod status;
pub mod store;

pub use audit::{AuditAction, AuditError, AuditEvent, AuditLog};
pub use error::RegistryError;
pub use record::{ExperimentId, ExperimentRecord};
pub use status::{allowed_transitions, validate_transition, ExperimentStatus};
pub use store::Registry;
