//! Run status state machine and stage enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four fixed pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Parse/normalize the inbound event and link an incident.
    Ingest,
    /// Run diagnostic checks.
    Check,
    /// Produce recommendations.
    Analyze,
    /// Dispatch notifications.
    Notify,
}

impl StageName {
    /// Stages in execution order.
    pub const ALL: [Self; 4] = [Self::Ingest, Self::Check, Self::Analyze, Self::Notify];

    /// Returns the run status reached when this stage succeeds.
    #[must_use]
    pub fn completed_status(self) -> RunStatus {
        match self {
            Self::Ingest => RunStatus::Ingested,
            Self::Check => RunStatus::Checked,
            Self::Analyze => RunStatus::Analyzed,
            Self::Notify => RunStatus::Notified,
        }
    }

    /// Returns the stage's position in the fixed order.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Ingest => 0,
            Self::Check => 1,
            Self::Analyze => 2,
            Self::Notify => 3,
        }
    }

    /// Returns the stage string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Check => "check",
            Self::Analyze => "analyze",
            Self::Notify => "notify",
        }
    }

    /// Parses a stage name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ingest" => Some(Self::Ingest),
            "check" => Some(Self::Check),
            "analyze" => Some(Self::Analyze),
            "notify" => Some(Self::Notify),
            _ => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a fixed-stage pipeline run.
///
/// ```text
/// PENDING -> INGESTED -> CHECKED -> ANALYZED -> NOTIFIED
///     \________\___________\__________\______-> FAILED
/// ```
///
/// `RETRYING` and `SKIPPED` are intermediate markers that may appear between
/// any two progress states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run created, no stage finished yet.
    Pending,
    /// Ingest stage succeeded.
    Ingested,
    /// Check stage succeeded.
    Checked,
    /// Analyze stage succeeded (or fell back).
    Analyzed,
    /// Terminal success.
    Notified,
    /// Terminal failure.
    Failed,
    /// A stage is being retried.
    Retrying,
    /// A stage was disabled by configuration.
    Skipped,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Ingested => write!(f, "INGESTED"),
            Self::Checked => write!(f, "CHECKED"),
            Self::Analyzed => write!(f, "ANALYZED"),
            Self::Notified => write!(f, "NOTIFIED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Retrying => write!(f, "RETRYING"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Notified | Self::Failed)
    }

    /// Progress rank for the stage-completion states.
    #[must_use]
    pub fn progress(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Ingested => Some(1),
            Self::Checked => Some(2),
            Self::Analyzed => Some(3),
            Self::Notified => Some(4),
            Self::Failed | Self::Retrying | Self::Skipped => None,
        }
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    ///
    /// Terminal states never move and nothing moves back into `PENDING`.
    /// Between two progress states the rank must strictly increase. Moves
    /// routed through `RETRYING` or `SKIPPED` are checked against the rank
    /// the run already reached by [`crate::core::PipelineRun::transition`].
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() || next == Self::Pending {
            return false;
        }
        match (self.progress(), next.progress()) {
            (Some(from), Some(to)) => to > from,
            _ => true,
        }
    }
}

/// Outcome recorded on a single stage or node execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The attempt is in flight.
    Running,
    /// The attempt succeeded.
    Succeeded,
    /// The attempt failed.
    Failed,
    /// The stage was disabled and not invoked.
    Skipped,
    /// A degraded output was synthesized after the stage failed.
    Fallback,
    /// Output copied from the run this one resumed.
    Carried,
}

impl ExecutionStatus {
    /// Returns true if downstream stages may consume this row's output.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Succeeded | Self::Fallback | Self::Carried)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Fallback => write!(f, "fallback"),
            Self::Carried => write!(f, "carried"),
        }
    }
}

/// Status of a definition-based chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    /// Created, not started.
    Pending,
    /// Walking the chain.
    Running,
    /// Reached the end of the chain.
    Completed,
    /// A required node failed.
    Failed,
}

impl ChainStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
