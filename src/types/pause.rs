//! Recording pauses.

use serde::{Deserialize, Serialize};

/// Who triggered a recording pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// The rider pressed the stop button.
    Manual,
    /// The device auto-paused, typically on loss of movement.
    Automatic,
}

/// A closed interval during which the recording timer was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PauseInterval {
    /// Epoch milliseconds, inclusive.
    pub start: i64,
    /// Epoch milliseconds, exclusive.
    pub end: i64,
    pub reason: PauseReason,
}

impl PauseInterval {
    /// Length of the pause in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}
