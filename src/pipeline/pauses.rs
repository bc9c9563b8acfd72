//! Pause interval tracking from raw timer events.
//!
//! Devices report the recording timer as a stream of start/stop transitions
//! with plenty of noise: duplicate stops across file boundaries, auto-pause
//! flapping at traffic lights, a final stop that never gets a matching
//! start. The tracker runs a two-state machine over the stream and keeps
//! only pauses that survive the configured debounce window.

use std::time::Duration;

use tracing::trace;

use crate::types::{PauseInterval, PauseReason, TimerAction, TimerEvent};

#[derive(Debug, Clone, Copy)]
enum TimerState {
    Running,
    Paused { since: i64, reason: PauseReason },
}

/// State machine over timer events, yielding debounced pause intervals.
///
/// Recording is assumed running before the first event; a leading start is
/// a duplicate and ignored. An open pause at end of stream closes at the
/// recording end time.
#[derive(Debug)]
pub struct PauseTracker {
    debounce_ms: i64,
    state: TimerState,
    intervals: Vec<PauseInterval>,
}

impl PauseTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce_ms: debounce.as_millis() as i64,
            state: TimerState::Running,
            intervals: Vec::new(),
        }
    }

    /// Feed the next timer event in stream order.
    pub fn observe(&mut self, event: &TimerEvent) {
        match (self.state, event.action) {
            (TimerState::Running, TimerAction::Stop | TimerAction::StopAll) => {
                self.state = TimerState::Paused { since: event.time, reason: event.reason };
            }
            (TimerState::Paused { since, reason }, TimerAction::Start) => {
                self.close(since, event.time, reason);
                self.state = TimerState::Running;
            }
            (TimerState::Running, TimerAction::Start) => {
                trace!(time = event.time, "duplicate timer start ignored");
            }
            (TimerState::Paused { .. }, TimerAction::Stop | TimerAction::StopAll) => {
                trace!(time = event.time, "duplicate timer stop ignored");
            }
        }
    }

    /// End of stream: close a still-open pause at the recording end and
    /// return all recorded intervals in order.
    pub fn finish(mut self, end_time: i64) -> Vec<PauseInterval> {
        if let TimerState::Paused { since, reason } = self.state {
            self.close(since, end_time, reason);
        }
        self.intervals
    }

    fn close(&mut self, start: i64, end: i64, reason: PauseReason) {
        if end - start < self.debounce_ms {
            trace!(start, end, "pause below debounce window discarded");
            return;
        }
        self.intervals.push(PauseInterval { start, end, reason });
    }
}
