//! Agent run queue: asynchronous assistant jobs with a strict state machine.
//!
//! - **`queue`**: the [`RunQueue`] service: start, claim, complete, cancel.
//! - **`executor`**: the outbound seam to whatever actually turns a prompt
//!   into edits, plus a simulated implementation.
//! - **`worker`**: a polling worker loop that pulls claims and feeds results
//!   back through the queue.
//!
//! State machine: `Queued -> Running -> {Success, Failed}`, and
//! `Queued|Running -> Cancelled`. No transition leaves a terminal state; all
//! transitions are conditional updates in the backing store, so losing the
//! race is reported as a Conflict rather than observed as a torn write.

mod executor;
mod queue;
mod worker;

pub use executor::{
    AgentExecutor, ExecutionOutcome, ExecutionRequest, ExecutionStatus, SimulatedExecutor,
};
pub use queue::{sanitize_messages, RunQueue, DEFAULT_RUN_PROMPT};
pub use worker::{RunWorker, WorkerHandle, WorkerStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::{ActionId, ActionRecord};
use crate::threads::ThreadId;

// ═══════════════════════════════════════════════════════════════════════════════
// Run Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the assistant is asked to behave for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute edits directly.
    Direct,
    /// Produce a plan for review before executing.
    Plan,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Plan => "plan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "plan" => Some(Self::Plan),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent run row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub org_id: Uuid,
    pub mode: RunMode,
    pub model: Option<String>,
    pub prompt: String,
    pub status: RunStatus,
    pub runner_id: Option<String>,
    /// The chat action whose content seeded the prompt, if any.
    pub chat_message_id: Option<ActionId>,
    pub result_messages: Vec<String>,
    pub result_changes: serde_json::Value,
    pub run_error: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for enqueuing a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub mode: RunMode,
    pub model: Option<String>,
    pub prompt: String,
    pub chat_message_id: Option<ActionId>,
    pub created_by: Option<String>,
}

/// Result of an explicit claim.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The run transitioned Queued -> Running under this claim.
    Claimed(RunRecord),
    /// The run was already Running under the same runner; idempotent re-claim.
    AlreadyOwned(RunRecord),
}

impl ClaimOutcome {
    pub fn run(&self) -> &RunRecord {
        match self {
            Self::Claimed(run) | Self::AlreadyOwned(run) => run,
        }
    }
}

/// Input for finalizing a run (conditional update + ExecuteResponse action,
/// one transaction).
#[derive(Debug, Clone)]
pub struct FinalizeRun {
    /// Must be Success or Failed.
    pub status: RunStatus,
    /// Already sanitized, non-empty.
    pub messages: Vec<String>,
    pub changes: serde_json::Value,
    pub error: Option<String>,
    /// Id for the appended ExecuteResponse action.
    pub response_action_id: ActionId,
}

/// A finalized run together with the ExecuteResponse action it appended.
#[derive(Debug, Clone)]
pub struct FinalizedRun {
    pub run: RunRecord,
    pub action: ActionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_terminality() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_mode_roundtrip() {
        assert_eq!(RunMode::parse("direct"), Some(RunMode::Direct));
        assert_eq!(RunMode::parse("plan"), Some(RunMode::Plan));
        assert_eq!(RunMode::parse("auto"), None);
    }
}
