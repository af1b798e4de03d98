use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{StudentId, TestId};

use super::state::SessionState;

/// Durable copy of a session, written after every mutation.
///
/// Only a recovery aid: the live `SessionState` stays the source of truth.
/// `sequence` orders writes so that a delayed older save never replaces a
/// newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub sequence: u64,
    pub saved_at: DateTime<Utc>,
    pub state: SessionState,
}

impl SessionSnapshot {
    #[must_use]
    pub fn capture(state: &SessionState, saved_at: DateTime<Utc>) -> Self {
        Self {
            sequence: state.revision(),
            saved_at,
            state: state.clone(),
        }
    }

    #[must_use]
    pub fn test_id(&self) -> &TestId {
        self.state.test_id()
    }

    #[must_use]
    pub fn student_id(&self) -> &StudentId {
        self.state.student_id()
    }

    /// Rebuild the live state, charging the time that passed since the save.
    #[must_use]
    pub fn into_state(self, now: DateTime<Utc>) -> SessionState {
        let mut state = self.state;
        state.restore_after_reload(self.saved_at, now);
        state
    }
}
