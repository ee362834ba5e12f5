use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// Lifecycle of a fire-once request such as quote generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationState<T> {
    pub status: MutationStatus,
    pub data: Option<T>,
    pub error: Option<SimulationError>,
    /// Failed attempts of the current run.
    pub failure_count: u32,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl<T> MutationState<T> {
    pub fn idle() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
            failure_count: 0,
            submitted_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = MutationStatus::Pending;
        self.data = None;
        self.error = None;
        self.failure_count = 0;
        self.submitted_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn succeed(&mut self, data: T) {
        self.status = MutationStatus::Success;
        self.data = Some(data);
        self.error = None;
    }

    pub fn fail(&mut self, error: SimulationError) {
        self.status = MutationStatus::Error;
        self.data = None;
        self.error = Some(error);
    }

    pub fn reset(&mut self) {
        *self = Self::idle();
    }

    pub fn is_idle(&self) -> bool {
        self.status == MutationStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimulationErrorKind;

    #[test]
    fn test_lifecycle() {
        let mut state: MutationState<u32> = MutationState::default();
        assert!(state.is_idle());

        state.start();
        assert!(state.is_pending());
        assert!(state.submitted_at.is_some());

        state.record_failure();
        state.fail(SimulationError::new(SimulationErrorKind::TimeoutError, "slow"));
        assert!(state.is_error());
        assert_eq!(state.failure_count, 1);

        state.start();
        assert_eq!(state.failure_count, 0);
        assert!(state.error.is_none());
        state.succeed(3);
        assert_eq!(state.data, Some(3));

        state.reset();
        assert_eq!(state, MutationState::idle());
    }
}
