//! Backoff schedule for block read retries
//!
//! The schedule is a literal lookup table rather than a formula: entry `i`
//! is the wait before retry `i + 1`. The reference table starts aggressive
//! and becomes very patient, so short network blips and long backend
//! outages are both survived.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reference schedule: 1s, 5s, 30s, 2m, 5m, 15m, 30m, 1h, 2h, 6h
const REFERENCE_SCHEDULE_SECS: [u64; 10] = [
    1,
    5,
    30,
    2 * 60,
    5 * 60,
    15 * 60,
    30 * 60,
    60 * 60,
    2 * 60 * 60,
    6 * 60 * 60,
];

/// Immutable ordered sequence of wait durations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u64>", into = "Vec<u64>")]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// Create a schedule from explicit delays
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// The production schedule (10 entries, 1s up to 6h)
    pub fn reference() -> Self {
        Self::from_secs(&REFERENCE_SCHEDULE_SECS)
    }

    /// Create a schedule from whole seconds
    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// A schedule with no retries: the first failure is final
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Number of retries the schedule allows
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Wait before retry number `attempt + 1`, or `None` once exhausted
    pub fn delay(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Duration> + '_ {
        self.delays.iter().copied()
    }

    /// Sum of all waits, i.e. the worst-case time spent sleeping
    pub fn total(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::reference()
    }
}

impl From<Vec<u64>> for BackoffSchedule {
    fn from(secs: Vec<u64>) -> Self {
        Self::from_secs(&secs)
    }
}

impl From<BackoffSchedule> for Vec<u64> {
    fn from(schedule: BackoffSchedule) -> Self {
        schedule.delays.iter().map(Duration::as_secs).collect()
    }
}
