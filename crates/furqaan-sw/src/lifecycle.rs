//! Worker lifecycle states.

use serde::{Deserialize, Serialize};

use crate::error::{ServiceWorkerError, SwResult};

/// Service worker state.
///
/// ```text
/// Unregistered -> Installing -> Installed -> Activating -> Activated
///                      |            |                          |
///                      +------------+---------> Redundant <----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Constructed, install not started.
    #[default]
    Unregistered,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl WorkerState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Unregistered, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Installed, Redundant)
                | (Activating, Activated)
                | (Activated, Redundant)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, next: WorkerState) -> SwResult<()> {
        if !self.can_transition_to(next) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move from {:?} to {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }

    pub fn is_active(self) -> bool {
        self == WorkerState::Activated
    }

    pub fn is_redundant(self) -> bool {
        self == WorkerState::Redundant
    }
}
