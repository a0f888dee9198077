//! The run queue service.
//!
//! All state transitions are conditional updates executed by the backend in
//! one short transaction each; this service layers role checks, prompt
//! resolution, message sanitation, and event publication on top. Agent
//! execution itself happens elsewhere, between claim and complete, never
//! inside a store transaction.

use metrics::counter;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::{ActionId, ActionType};
use crate::error::{ErrorCode, Result, StaffError};
use crate::events::{EventLog, EventType, NewEvent};
use crate::rbac::{require_editor, Actor};
use crate::store::Backend;
use crate::threads::{ThreadId, ThreadRecord, ThreadStatus};

use super::{ClaimOutcome, FinalizeRun, FinalizedRun, NewRun, RunId, RunMode, RunRecord, RunStatus};

/// Prompt used when neither an explicit prompt nor a chat message is given.
pub const DEFAULT_RUN_PROMPT: &str = "Continue working on this thread.";

/// Drop non-strings and blanks, trim the rest.
///
/// Completion payloads arrive as loosely typed JSON from the executor; only
/// trimmed, non-empty strings are persisted.
pub fn sanitize_messages(raw: &[serde_json::Value]) -> Vec<String> {
    raw.iter()
        .filter_map(|value| value.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Service facade for the agent run queue.
#[derive(Clone)]
pub struct RunQueue {
    backend: Arc<dyn Backend>,
    events: EventLog,
}

impl RunQueue {
    pub fn new(backend: Arc<dyn Backend>, events: EventLog) -> Self {
        Self { backend, events }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Start
    // ─────────────────────────────────────────────────────────────────────────

    /// Enqueue a new run for a thread.
    ///
    /// The prompt is resolved in priority order: explicit prompt, the
    /// referenced chat message's content, then [`DEFAULT_RUN_PROMPT`].
    /// Publishes `assistant.run.started` followed immediately by
    /// `assistant.run.waiting_input`, the synchronous handshake telling
    /// consumers the run needs no further input before work begins.
    #[instrument(skip(self, actor, prompt), fields(thread_id = %thread_id, mode = %mode))]
    pub async fn start_run(
        &self,
        actor: &Actor,
        thread_id: ThreadId,
        mode: RunMode,
        prompt: Option<String>,
        model: Option<String>,
        chat_message_id: Option<ActionId>,
    ) -> Result<RunRecord> {
        let role = self.backend.member_role(actor.org_id, actor.user_id).await?;
        require_editor(role)?;

        let thread = self.open_thread(actor, thread_id).await?;

        let prompt = self.resolve_prompt(thread_id, prompt, chat_message_id).await?;

        let run = self
            .backend
            .insert_run(NewRun {
                id: RunId::new(),
                thread_id,
                mode,
                model,
                prompt,
                chat_message_id,
                created_by: Some(actor.handle.clone()),
            })
            .await?;

        counter!("staffx_runs_started_total", "mode" => mode.as_str()).increment(1);

        self.events
            .publish(
                NewEvent::new(EventType::RunStarted, "run", run.id.0, thread.org_id)
                    .with_payload(serde_json::json!({
                        "run_id": run.id,
                        "thread_id": run.thread_id,
                        "mode": run.mode,
                        "model": run.model,
                    })),
            )
            .await?;
        self.events
            .publish(
                NewEvent::new(EventType::RunWaitingInput, "run", run.id.0, thread.org_id)
                    .with_payload(serde_json::json!({
                        "run_id": run.id,
                        "thread_id": run.thread_id,
                    })),
            )
            .await?;

        tracing::info!(run_id = %run.id, "Run enqueued");
        Ok(run)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Claim
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim the oldest eligible queued run for a worker.
    ///
    /// Eligible means the run's thread has no running run; the exclusivity
    /// check happens at claim time inside the backend transaction, skipping
    /// rows other claimers hold. Returns None when nothing is eligible.
    #[instrument(skip(self))]
    pub async fn claim_queued_run(&self, runner_id: &str) -> Result<Option<RunRecord>> {
        let claimed = self.backend.claim_queued_run(runner_id).await?;
        if let Some(run) = &claimed {
            counter!("staffx_runs_claimed_total").increment(1);
            tracing::info!(run_id = %run.id, runner = runner_id, "Run claimed from queue");
        }
        Ok(claimed)
    }

    /// Claim one specific run.
    ///
    /// Re-claiming a run already running under the same runner is idempotent.
    /// Every successful call publishes exactly one `assistant.run.progress`.
    #[instrument(skip(self))]
    pub async fn claim_run(&self, run_id: RunId, runner_id: &str) -> Result<RunRecord> {
        let outcome = self.backend.claim_run(run_id, runner_id).await?;

        let run = outcome.run().clone();
        if matches!(outcome, ClaimOutcome::Claimed(_)) {
            counter!("staffx_runs_claimed_total").increment(1);
        }

        self.events
            .publish(
                NewEvent::new(EventType::RunProgress, "run", run.id.0, run.org_id)
                    .with_payload(serde_json::json!({
                        "run_id": run.id,
                        "thread_id": run.thread_id,
                        "runner_id": runner_id,
                        "status": run.status,
                    })),
            )
            .await?;

        Ok(run)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Complete / Cancel
    // ─────────────────────────────────────────────────────────────────────────

    /// Finalize a run with its result.
    ///
    /// Messages are sanitized first; an empty sanitized list rejects the call
    /// before any state change. The conditional status update and the
    /// appended ExecuteResponse action commit in one transaction; a run that
    /// is already terminal yields a Conflict and publishes nothing.
    #[instrument(skip(self, messages, changes, error), fields(status = %status))]
    pub async fn complete_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        messages: &[serde_json::Value],
        changes: Vec<serde_json::Value>,
        error: Option<String>,
    ) -> Result<FinalizedRun> {
        if !matches!(status, RunStatus::Success | RunStatus::Failed) {
            return Err(StaffError::invalid_input(
                "Completion status must be success or failed",
            ));
        }

        let sanitized = sanitize_messages(messages);
        if sanitized.is_empty() {
            return Err(StaffError::new(
                ErrorCode::EmptyRunResult,
                "Completion requires at least one non-blank message",
            ));
        }

        let finalized = self
            .backend
            .finalize_run(
                run_id,
                FinalizeRun {
                    status,
                    messages: sanitized,
                    changes: serde_json::Value::Array(changes),
                    error,
                    response_action_id: ActionId::new(),
                },
            )
            .await?;

        counter!("staffx_runs_finalized_total", "status" => status.as_str()).increment(1);

        let run = &finalized.run;
        let completion_event = match status {
            RunStatus::Success => EventType::RunCompleted,
            _ => EventType::RunFailed,
        };
        self.events
            .publish(
                NewEvent::new(completion_event, "run", run.id.0, run.org_id).with_payload(
                    serde_json::json!({
                        "run_id": run.id,
                        "thread_id": run.thread_id,
                        "status": run.status,
                        "messages": run.result_messages.len(),
                        "action_id": finalized.action.id,
                    }),
                ),
            )
            .await?;
        self.publish_session_finished(run).await?;

        debug_assert_eq!(finalized.action.action_type, ActionType::ExecuteResponse);
        tracing::info!(
            run_id = %run.id,
            status = %run.status,
            action_position = finalized.action.position,
            "Run finalized"
        );
        Ok(finalized)
    }

    /// Cancel a run.
    ///
    /// Cancellation only flips recorded state; an execution already underway
    /// is not preempted; its late completion loses the conditional update
    /// and receives the same Conflict as a double-complete.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: RunId) -> Result<RunRecord> {
        let run = self
            .backend
            .cancel_run(run_id, "Run cancelled before completion")
            .await?;

        counter!("staffx_runs_finalized_total", "status" => "cancelled").increment(1);

        self.events
            .publish(
                NewEvent::new(EventType::RunCancelled, "run", run.id.0, run.org_id).with_payload(
                    serde_json::json!({
                        "run_id": run.id,
                        "thread_id": run.thread_id,
                    }),
                ),
            )
            .await?;
        self.publish_session_finished(&run).await?;

        tracing::info!(run_id = %run.id, "Run cancelled");
        Ok(run)
    }

    /// Fetch a run by id.
    pub async fn get_run(&self, run_id: RunId) -> Result<RunRecord> {
        self.backend
            .get_run(run_id)
            .await?
            .ok_or_else(|| StaffError::not_found("run", run_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn open_thread(&self, actor: &Actor, thread_id: ThreadId) -> Result<ThreadRecord> {
        let thread = self
            .backend
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;
        if thread.org_id != actor.org_id {
            return Err(StaffError::forbidden("No access to this thread"));
        }
        match thread.status {
            ThreadStatus::Open => Ok(thread),
            ThreadStatus::Closed => Err(StaffError::conflict(
                ErrorCode::ThreadClosed,
                "Thread is closed",
            )),
            ThreadStatus::Committed => Err(StaffError::conflict(
                ErrorCode::ThreadCommitted,
                "Thread is committed",
            )),
        }
    }

    async fn resolve_prompt(
        &self,
        thread_id: ThreadId,
        prompt: Option<String>,
        chat_message_id: Option<ActionId>,
    ) -> Result<String> {
        if let Some(prompt) = prompt {
            let trimmed = prompt.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_owned());
            }
        }

        if let Some(action_id) = chat_message_id {
            let action = self
                .backend
                .get_action(action_id)
                .await?
                .ok_or_else(|| StaffError::not_found("action", action_id.to_string()))?;
            if action.thread_id != thread_id {
                return Err(StaffError::invalid_input(
                    "Referenced chat message belongs to another thread",
                ));
            }
            if let Some(first) = action.messages.first() {
                if !first.trim().is_empty() {
                    return Ok(first.trim().to_owned());
                }
            }
        }

        Ok(DEFAULT_RUN_PROMPT.to_owned())
    }

    async fn publish_session_finished(&self, run: &RunRecord) -> Result<()> {
        self.events
            .publish(
                NewEvent::new(
                    EventType::ChatSessionFinished,
                    "thread",
                    run.thread_id.0,
                    run.org_id,
                )
                .with_payload(serde_json::json!({
                    "thread_id": run.thread_id,
                    "run_id": run.id,
                    "status": run.status,
                })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_trims_and_drops() {
        let raw = vec![
            serde_json::json!("  keep "),
            serde_json::json!(""),
            serde_json::json!("   "),
            serde_json::json!(42),
            serde_json::json!(null),
            serde_json::json!(" x "),
            serde_json::json!(["not", "a", "string"]),
        ];
        assert_eq!(sanitize_messages(&raw), vec!["keep", "x"]);
    }

    #[test]
    fn test_sanitize_empty_input() {
        assert!(sanitize_messages(&[]).is_empty());
        assert!(sanitize_messages(&[serde_json::json!("  ")]).is_empty());
    }
}
