//! Experiment lifecycle states and the legal transitions between them.
//!
//! The lifecycle is one-way: `Created -> InProgress -> Completed`.
//! `InProgress -> InProgress` is also legal because re-opening a live
//! experiment is an idempotent refresh. `Completed` has no exits; a
//! finalized record is immutable evidence.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Registered and scaffolded, never worked in.
    Created,
    /// Open for work; inputs staged, outputs accumulating.
    InProgress,
    /// Finalized. Manifest written, signed, and registered.
    Completed,
}

impl ExperimentStatus {
    /// Whether the status admits no further transitions.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses reachable in one step from `from`.
#[must_use]
pub fn allowed_transitions(from: ExperimentStatus) -> &'static [ExperimentStatus] {
    use ExperimentStatus::{Completed, Created, InProgress};
    match from {
        Created => &[InProgress],
        InProgress => &[InProgress, Completed],
        Completed => &[],
    }
}

/// Validates a status transition.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidTransition`] naming both states
/// when the step is not legal.
pub fn validate_transition(
    from: ExperimentStatus,
    to: ExperimentStatus,
) -> Result<(), RegistryError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(RegistryError::InvalidTransition { from, to })
    }
}

fn allowed(from: ExperimentStatus, to: ExperimentStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = ExperimentStatus> {
        prop_oneof![
            Just(ExperimentStatus::Created),
            Just(ExperimentStatus::InProgress),
            Just(ExperimentStatus::Completed),
        ]
    }

    #[test]
    fn lifecycle_is_one_way() {
        use ExperimentStatus::{Completed, Created, InProgress};
        assert!(validate_transition(Created, InProgress).is_ok());
        assert!(validate_transition(InProgress, Completed).is_ok());
        // Reopening a live experiment is a refresh, not a regression.
        assert!(validate_transition(InProgress, InProgress).is_ok());

        assert!(validate_transition(Completed, InProgress).is_err());
        assert!(validate_transition(Completed, Created).is_err());
        assert!(validate_transition(InProgress, Created).is_err());
        assert!(validate_transition(Created, Completed).is_err());
    }

    #[test]
    fn terminal_status_has_no_exits() {
        assert!(ExperimentStatus::Completed.is_terminal());
        assert!(allowed_transitions(ExperimentStatus::Completed).is_empty());
    }

    #[test]
    fn invalid_transition_error_names_both_states() {
        let err = validate_transition(ExperimentStatus::Completed, ExperimentStatus::InProgress)
            .unwrap_err();
        assert_eq!(err.to_string(), "illegal status transition: completed -> in_progress");
    }

    proptest! {
        #[test]
        fn validation_agrees_with_allowed_transitions(
            from in any_status(),
            to in any_status(),
        ) {
            let listed = allowed_transitions(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to).is_ok(), listed);
        }

        #[test]
        fn no_transition_escapes_terminal(to in any_status()) {
            prop_assert!(validate_transition(ExperimentStatus::Completed, to).is_err());
        }
    }
}
