//! Wall-clock budgets for handler operations.

use std::time::{Duration, Instant};

/// Absolute deadline threaded through every handler operation.
///
/// Derived from the per-kind timeout table; polling loops check it between
/// sleeps and fail with [`ArmError::Timeout`](crate::ArmError::Timeout) once
/// it has passed. Cancellation itself is future-drop: every await point is a
/// prompt stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Time left until the deadline, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}
