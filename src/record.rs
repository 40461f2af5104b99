//! Plain data carried through a check run.

use std::{fmt, time::Duration};

use tokio::time::Instant;

/// Up or down, as observed by a probe or remembered by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Up,
    Down,
}

impl State {
    pub fn from_down(down: bool) -> Self {
        if down { State::Down } else { State::Up }
    }

    pub fn is_down(self) -> bool {
        self == State::Down
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Up => f.write_str("Up"),
            State::Down => f.write_str("Down"),
        }
    }
}

/// Persisted state of one monitored target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub id: String,
    pub down: bool,
    /// Epoch seconds of the last observed transition.
    pub last_change: i64,
    /// Set only during the run that created the record; never written to the store.
    pub is_new: bool,
    pub up_trigger: Option<String>,
    pub down_trigger: Option<String>,
}

impl TargetRecord {
    /// A record for a target seen for the first time, assumed up.
    pub fn new(id: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            down: false,
            last_change: now,
            is_new: true,
            up_trigger: None,
            down_trigger: None,
        }
    }

    pub fn state(&self) -> State {
        State::from_down(self.down)
    }

    pub fn trigger_for(&self, state: State) -> Option<&str> {
        match state {
            State::Up => self.up_trigger.as_deref(),
            State::Down => self.down_trigger.as_deref(),
        }
    }
}

/// What a prober reports for a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn reachable(elapsed: Duration) -> Self {
        Self {
            reachable: true,
            elapsed,
        }
    }

    pub fn unreachable(elapsed: Duration) -> Self {
        Self {
            reachable: false,
            elapsed,
        }
    }
}

/// A finished probe, as collected by the engine.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target_id: String,
    pub reachable: bool,
    pub elapsed: Duration,
    pub started_at: Instant,
}

/// How a result was reconciled against the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting of the target; state stored, no side effects.
    New,
    /// Observation matched the stored state.
    Unchanged,
    /// State changed; notifier (if any) accepted and the trigger was offered.
    Transition,
    /// State changed but the notifier failed, so the record was left untouched.
    NotifyFailed,
    /// Probe never finished before the run was cancelled; record left untouched.
    Abandoned,
}

/// One reconciled target, in the order the engine processed it.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub record: TargetRecord,
    pub reachable: bool,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl Reconciled {
    pub fn is_transition(&self) -> bool {
        self.outcome == Outcome::Transition
    }
}
