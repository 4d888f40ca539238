use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Failed,
}

impl TerminalStatus {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminalStatus::Success => 0,
            TerminalStatus::Failed => 1,
        }
    }
}

/// Where the executor is in its one-shot lifecycle.
///
/// Transitions only move forward:
///
/// ```text
/// Booting -> FetchingJob -> Running -> PublishingResult -> Terminating(Success|Failed)
///    \            \             \
///     +------------+-------------+--> Failed -> Terminating(Failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Booting,
    FetchingJob,
    Running,
    PublishingResult,
    Failed,
    Terminating(TerminalStatus),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminating(_))
    }

    pub fn can_transition_to(&self, next: &LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Booting, FetchingJob)
                | (FetchingJob, Running)
                | (Running, PublishingResult)
                | (PublishingResult, Terminating(_))
                | (Booting | FetchingJob | Running, Failed)
                | (Failed, Terminating(TerminalStatus::Failed))
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Booting => write!(f, "booting"),
            LifecycleState::FetchingJob => write!(f, "fetching_job"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::PublishingResult => write!(f, "publishing_result"),
            LifecycleState::Failed => write!(f, "failed"),
            LifecycleState::Terminating(TerminalStatus::Success) => write!(f, "terminating(success)"),
            LifecycleState::Terminating(TerminalStatus::Failed) => write!(f, "terminating(failed)"),
        }
    }
}
