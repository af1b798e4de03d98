use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::time::elapsed_between;

/// Deadline-based countdown.
///
/// Remaining time is always derived from the wall-clock deadline, never from a
/// count of ticks, so a host that delivers ticks late cannot stretch the budget.
/// Expiry is reported exactly once through `poll_expired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    duration_secs: u32,
    deadline: DateTime<Utc>,
    fired: bool,
}

impl Countdown {
    /// Start a countdown of `duration_secs` at `now`.
    #[must_use]
    pub fn start(duration_secs: u32, now: DateTime<Utc>) -> Self {
        Self {
            duration_secs,
            deadline: now + Duration::seconds(i64::from(duration_secs)),
            fired: false,
        }
    }

    /// Continue a countdown that was parked with `left` on the clock at
    /// `parked_at`. Wall-clock time since `parked_at` is charged in full.
    #[must_use]
    pub fn resume_from(
        duration_secs: u32,
        left: Duration,
        parked_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let budget = left
            .min(Duration::seconds(i64::from(duration_secs)))
            .max(Duration::zero());
        let left = (budget - elapsed_between(parked_at, now)).max(Duration::zero());
        Self {
            duration_secs,
            deadline: now + left,
            fired: false,
        }
    }

    /// Re-anchor the deadline after a reload of a copy saved at `saved_at`.
    ///
    /// The deadline only ever moves earlier: a clock that jumped backwards
    /// is charged the time left at the save, and a forward gap leaves the
    /// absolute deadline untouched.
    pub fn rebase(&mut self, saved_at: DateTime<Utc>, now: DateTime<Utc>) {
        let left_at_save = (self.deadline - saved_at).max(Duration::zero());
        let rebased = now + left_at_save - elapsed_between(saved_at, now);
        self.deadline = self.deadline.min(rebased);
    }

    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Exact time left. Zero once the deadline has passed.
    #[must_use]
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).max(Duration::zero())
    }

    /// Whole seconds left, rounded up for display. Zero once the deadline
    /// has passed.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        let left_ms = (self.deadline - now).num_milliseconds();
        if left_ms <= 0 {
            return 0;
        }
        let secs = (left_ms + 999) / 1000;
        u32::try_from(secs).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Returns true the first time the deadline is observed as passed.
    ///
    /// Every later call returns false, however many ticks arrive.
    pub fn poll_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.fired || !self.is_elapsed(now) {
            return false;
        }
        self.fired = true;
        true
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired
    }
}
