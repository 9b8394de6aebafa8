//! Run state machine.
//!
//! Every state change goes through `RunState::next`. The table is one
//! exhaustive match; pairs not listed are rejected.

use std::fmt;

use super::approval::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    #[default]
    Idle,
    Starting,
    WaitingApproval,
    Resuming,
    Done,
    Error,
}

/// Inputs that move the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Start,
    /// An approval request was seen in the stream or in the state fetch.
    Interrupted,
    /// The run finished without a pending approval.
    Completed,
    Failed,
    Decide,
    Reset,
    /// A persisted thread was found still waiting for approval.
    Restore,
}

/// A (state, trigger) pair outside the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RunState,
    pub trigger: Trigger,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} while {}",
            self.trigger.as_str(),
            self.from.as_str()
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::WaitingApproval => "waiting_approval",
            RunState::Resuming => "resuming",
            RunState::Done => "done",
            RunState::Error => "error",
        }
    }

    /// Applies a trigger.
    ///
    /// # Errors
    /// Returns `InvalidTransition` for any pair outside the table.
    pub fn next(self, trigger: Trigger) -> Result<RunState, InvalidTransition> {
        use RunState::{Done, Error, Idle, Resuming, Starting, WaitingApproval};
        use Trigger::{Completed, Decide, Failed, Interrupted, Reset, Restore, Start};

        match (self, trigger) {
            (Idle, Start) => Ok(Starting),
            (Idle, Restore) => Ok(WaitingApproval),
            (Starting | Resuming, Interrupted) => Ok(WaitingApproval),
            (Starting | Resuming, Completed) => Ok(Done),
            (Starting | Resuming, Failed) => Ok(Error),
            (WaitingApproval, Decide) => Ok(Resuming),
            (Idle | WaitingApproval | Done | Error, Reset) => Ok(Idle),
            (
                Idle | Starting | WaitingApproval | Resuming | Done | Error,
                Start | Restore | Interrupted | Completed | Failed | Decide | Reset,
            ) => Err(InvalidTransition {
                from: self,
                trigger,
            }),
        }
    }

    /// A stream operation is in flight.
    pub fn is_running(self) -> bool {
        matches!(self, RunState::Starting | RunState::Resuming)
    }

    pub fn can_start(self) -> bool {
        self == RunState::Idle
    }

    pub fn can_reset(self) -> bool {
        !self.is_running()
    }

    pub fn can_cancel(self) -> bool {
        self.is_running()
    }

    /// Decisions the user may submit right now.
    pub fn decisions(self) -> &'static [Decision] {
        if self == RunState::WaitingApproval {
            &Decision::ALL
        } else {
            &[]
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::Interrupted => "pause for approval",
            Trigger::Completed => "complete",
            Trigger::Failed => "fail",
            Trigger::Decide => "submit a decision",
            Trigger::Reset => "reset",
            Trigger::Restore => "restore",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [RunState; 6] = [
        RunState::Idle,
        RunState::Starting,
        RunState::WaitingApproval,
        RunState::Resuming,
        RunState::Done,
        RunState::Error,
    ];

    const TRIGGERS: [Trigger; 7] = [
        Trigger::Start,
        Trigger::Interrupted,
        Trigger::Completed,
        Trigger::Failed,
        Trigger::Decide,
        Trigger::Reset,
        Trigger::Restore,
    ];

    #[test]
    fn test_happy_path() {
        let state = RunState::Idle
            .next(Trigger::Start)
            .and_then(|s| s.next(Trigger::Interrupted))
            .and_then(|s| s.next(Trigger::Decide))
            .and_then(|s| s.next(Trigger::Completed))
            .and_then(|s| s.next(Trigger::Reset))
            .unwrap();
        assert_eq!(state, RunState::Idle);
    }

    #[test]
    fn test_running_states_resolve_to_exactly_one_outcome() {
        for state in [RunState::Starting, RunState::Resuming] {
            let outcomes: Vec<_> = TRIGGERS
                .iter()
                .filter_map(|t| state.next(*t).ok())
                .collect();
            assert_eq!(
                outcomes,
                vec![RunState::WaitingApproval, RunState::Done, RunState::Error]
            );
        }
    }

    #[test]
    fn test_idle_only_reachable_via_reset() {
        for state in STATES {
            for trigger in TRIGGERS {
                if state.next(trigger) == Ok(RunState::Idle) {
                    assert_eq!(trigger, Trigger::Reset, "{state} --{trigger:?}--> idle");
                }
            }
        }
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        let err = RunState::Done.next(Trigger::Start).unwrap_err();
        assert_eq!(err.to_string(), "cannot start while done");
        assert!(RunState::Starting.next(Trigger::Reset).is_err());
        assert!(RunState::Idle.next(Trigger::Decide).is_err());
        assert!(RunState::WaitingApproval.next(Trigger::Restore).is_err());
        assert_eq!(RunState::Idle.next(Trigger::Reset), Ok(RunState::Idle));
    }

    #[test]
    fn test_capabilities() {
        for state in STATES {
            assert_eq!(
                !state.decisions().is_empty(),
                state == RunState::WaitingApproval
            );
            assert_eq!(state.can_cancel(), state.is_running());
            assert_eq!(state.can_reset(), !state.is_running());
        }
        assert!(RunState::Idle.can_start());
        assert!(!RunState::Done.can_start());
        assert_eq!(RunState::WaitingApproval.decisions(), &Decision::ALL);
    }
}
