//! Executor run-state machine
//!
//! One save or deactivation run moves through:
//! idle -> running -> {success, user_cancelled, failed} -> idle (close).
//! Chain state already reflects completed steps when a run halts; closing
//! discards only the executor's view, and a fresh plan on re-entry skips
//! the steps that already landed.

use std::time::Instant;
use tracing::{info, warn};

/// Run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No run in progress
    Idle,
    /// Walking the step list
    Running,
    /// Every step confirmed
    Success,
    /// Stopped on a wallet rejection
    UserCancelled,
    /// Stopped on a revert or network failure
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Running => write!(f, "Running"),
            RunState::Success => write!(f, "Success"),
            RunState::UserCancelled => write!(f, "UserCancelled"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// State transition record
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: RunState,
    pub to: RunState,
    pub timestamp: i64,
    pub reason: Option<String>,
}

/// Guarded state machine with transition history
pub struct RunStateMachine {
    current: RunState,
    previous: Option<RunState>,
    state_entered_at: Instant,
    history: Vec<StateTransition>,
    max_history: usize,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Idle,
            previous: None,
            state_entered_at: Instant::now(),
            history: Vec::new(),
            max_history: 100,
        }
    }

    pub fn current_state(&self) -> RunState {
        self.current
    }

    pub fn previous_state(&self) -> Option<RunState> {
        self.previous
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    /// Check if transition is valid
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;

        match (self.current, target) {
            (Idle, Running) => true,

            (Running, Success) => true,
            (Running, UserCancelled) => true,
            (Running, Failed) => true,

            // close() discards the finished run
            (Success, Idle) => true,
            (UserCancelled, Idle) => true,
            (Failed, Idle) => true,

            (a, b) if a == b => false,
            _ => false,
        }
    }

    pub fn transition_to(&mut self, target: RunState) -> bool {
        self.transition_to_with_reason(target, None)
    }

    pub fn transition_to_with_reason(&mut self, target: RunState, reason: Option<String>) -> bool {
        if !self.can_transition_to(target) {
            warn!("Invalid run transition: {} -> {}", self.current, target);
            return false;
        }

        let transition = StateTransition {
            from: self.current,
            to: target,
            timestamp: chrono::Utc::now().timestamp_millis(),
            reason: reason.clone(),
        };

        info!(
            "Run transition: {} -> {}{}",
            self.current,
            target,
            reason.map(|r| format!(" ({r})")).unwrap_or_default()
        );

        self.previous = Some(self.current);
        self.current = target;
        self.state_entered_at = Instant::now();

        self.history.push(transition);
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        true
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn is_running(&self) -> bool {
        self.current == RunState::Running
    }

    /// A halted run awaiting close
    pub fn is_halted(&self) -> bool {
        matches!(self.current, RunState::UserCancelled | RunState::Failed)
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = RunStateMachine::new();
        assert_eq!(sm.current_state(), RunState::Idle);
    }

    #[test]
    fn test_full_run_lifecycle() {
        let mut sm = RunStateMachine::new();
        assert!(sm.transition_to(RunState::Running));
        assert!(sm.transition_to(RunState::Success));
        assert!(sm.transition_to(RunState::Idle));
        assert_eq!(sm.history().len(), 3);
    }

    #[test]
    fn test_halted_states_only_close() {
        let mut sm = RunStateMachine::new();
        sm.transition_to(RunState::Running);
        sm.transition_to(RunState::UserCancelled);
        assert!(sm.is_halted());

        // retry must go through close
        assert!(!sm.transition_to(RunState::Running));
        assert!(sm.transition_to(RunState::Idle));
        assert!(sm.transition_to(RunState::Running));
    }

    #[test]
    fn test_cannot_start_while_running() {
        let mut sm = RunStateMachine::new();
        sm.transition_to(RunState::Running);
        assert!(!sm.can_transition_to(RunState::Running));
        assert!(!sm.transition_to(RunState::Idle));
    }
}
