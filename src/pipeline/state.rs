// src/pipeline/state.rs
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Fetching,
    Classifying,
    Deduping,
    Storing,
    Done,
    Failed,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Idle, Failed)
                | (Fetching, Classifying)
                | (Fetching, Done)
                | (Classifying, Deduping)
                | (Deduping, Storing)
                | (Storing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Classifying => "classifying",
            RunState::Deduping => "deduping",
            RunState::Storing => "storing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the history of transitions taken.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: RunState,
    history: Vec<RunState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            current: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }
}

impl StateMachine {
    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move to `next`. An illegal transition is a bug in the orchestrator; it
    /// is logged and ignored.
    pub fn advance(&mut self, next: RunState) {
        if !self.current.can_advance_to(next) {
            debug_assert!(false, "illegal run transition {} -> {}", self.current, next);
            warn!(from = %self.current, to = %next, "ignoring illegal run transition");
            return;
        }
        debug!(from = %self.current, to = %next, "run state");
        self.current = next;
        self.history.push(next);
    }
}
