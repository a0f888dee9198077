//! Run queue integration tests: lifecycle, claiming, completion conflicts.

use std::sync::Arc;

use staffx_core::prelude::*;
use tokio::sync::Barrier;
use uuid::Uuid;

async fn setup() -> (Core, Actor, ThreadRecord) {
    let core = Core::in_memory();
    let org = Uuid::new_v4();
    let actor = Actor::new(Uuid::new_v4(), "ada", org);
    core.backend
        .upsert_member(org, actor.user_id, MemberRole::Owner)
        .await
        .unwrap();
    let project = core.threads.create_project(&actor, "demo").await.unwrap();
    let thread = core
        .threads
        .create_thread(&actor, project.id, "payments", None)
        .await
        .unwrap();
    (core, actor, thread)
}

async fn run_events(core: &Core, run: &RunRecord) -> Vec<EventType> {
    core.events
        .query(EventQuery {
            aggregate_type: Some("run".into()),
            aggregate_id: Some(run.id.0),
            ..Default::default()
        })
        .await
        .unwrap()
        .events
        .iter()
        .map(|e| e.event_type)
        .collect()
}

#[tokio::test]
async fn test_run_lifecycle_scenario() {
    let (core, actor, thread) = setup().await;

    // A prior chat message so the ExecuteResponse position is prev_max + 1.
    let chat = core
        .threads
        .append_chat_message(&actor, thread.id, "please add a cache")
        .await
        .unwrap();
    assert_eq!(chat.position, 1);

    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(
        run_events(&core, &run).await,
        vec![EventType::RunStarted, EventType::RunWaitingInput]
    );

    let claimed = core.runs.claim_queued_run("w1").await.unwrap().unwrap();
    assert_eq!(claimed.id, run.id);
    assert_eq!(claimed.status, RunStatus::Running);
    assert_eq!(claimed.runner_id.as_deref(), Some("w1"));
    assert!(claimed.started_at.is_some());

    let finalized = core
        .runs
        .complete_run(
            run.id,
            RunStatus::Success,
            &[
                serde_json::json!("  keep "),
                serde_json::json!(""),
                serde_json::json!(" x "),
            ],
            vec![],
            None,
        )
        .await
        .unwrap();

    assert_eq!(finalized.run.status, RunStatus::Success);
    assert_eq!(finalized.run.result_messages, vec!["keep", "x"]);
    assert_eq!(finalized.action.action_type, ActionType::ExecuteResponse);
    assert_eq!(finalized.action.position, chat.position + 1);
    assert_eq!(finalized.action.messages, vec!["keep", "x"]);

    assert_eq!(
        run_events(&core, &run).await,
        vec![
            EventType::RunStarted,
            EventType::RunWaitingInput,
            EventType::RunCompleted,
        ]
    );

    // chat.session.finished lands on the thread aggregate, after completion.
    let thread_events: Vec<EventType> = core
        .events
        .query(EventQuery {
            aggregate_type: Some("thread".into()),
            aggregate_id: Some(thread.id.0),
            ..Default::default()
        })
        .await
        .unwrap()
        .events
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        thread_events.last().copied(),
        Some(EventType::ChatSessionFinished)
    );
}

#[tokio::test]
async fn test_prompt_resolution_order() {
    let (core, actor, thread) = setup().await;

    // Explicit prompt wins.
    let run = core
        .runs
        .start_run(
            &actor,
            thread.id,
            RunMode::Direct,
            Some("  do the thing  ".into()),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(run.prompt, "do the thing");

    // Chat message content is the fallback.
    let chat = core
        .threads
        .append_chat_message(&actor, thread.id, "add retry logic")
        .await
        .unwrap();
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Plan, None, None, Some(chat.id))
        .await
        .unwrap();
    assert_eq!(run.prompt, "add retry logic");

    // Blank explicit prompt falls through to the chat message.
    let run = core
        .runs
        .start_run(
            &actor,
            thread.id,
            RunMode::Plan,
            Some("   ".into()),
            None,
            Some(chat.id),
        )
        .await
        .unwrap();
    assert_eq!(run.prompt, "add retry logic");

    // Nothing given: the fixed default.
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    assert_eq!(run.prompt, staffx_core::runs::DEFAULT_RUN_PROMPT);
}

#[tokio::test]
async fn test_start_run_requires_editor_role() {
    let (core, actor, thread) = setup().await;

    let viewer = Actor::new(Uuid::new_v4(), "vic", actor.org_id);
    core.backend
        .upsert_member(actor.org_id, viewer.user_id, MemberRole::Viewer)
        .await
        .unwrap();

    let err = core
        .runs
        .start_run(&viewer, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let stranger = Actor::new(Uuid::new_v4(), "sam", actor.org_id);
    let err = core
        .runs
        .start_run(&stranger, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_at_most_one_running_run_per_thread() {
    let (core, actor, thread) = setup().await;

    // Several runs may queue for the same thread simultaneously.
    for _ in 0..3 {
        core.runs
            .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
            .await
            .unwrap();
    }

    let core = Arc::new(core);
    let barrier = Arc::new(Barrier::new(8));
    let mut handles = Vec::new();
    for i in 0..8 {
        let core = core.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            core.runs
                .claim_queued_run(&format!("w{}", i))
                .await
                .unwrap()
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            claimed += 1;
        }
    }

    // Exclusivity is enforced at claim time: exactly one claim wins while
    // the thread has a running run.
    assert_eq!(claimed, 1);
}

#[tokio::test]
async fn test_claims_proceed_across_threads() {
    let (core, actor, thread_a) = setup().await;
    let project = core.threads.list_projects(&actor).await.unwrap()[0].clone();
    let thread_b = core
        .threads
        .create_thread(&actor, project.id, "billing", None)
        .await
        .unwrap();

    core.runs
        .start_run(&actor, thread_a.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    core.runs
        .start_run(&actor, thread_b.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();

    let first = core.runs.claim_queued_run("w1").await.unwrap().unwrap();
    let second = core.runs.claim_queued_run("w2").await.unwrap().unwrap();
    assert_ne!(first.thread_id, second.thread_id);
    assert!(core.runs.claim_queued_run("w3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reclaim_same_runner_is_idempotent() {
    let (core, actor, thread) = setup().await;
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();

    let first = core.runs.claim_run(run.id, "w1").await.unwrap();
    assert_eq!(first.status, RunStatus::Running);

    let second = core.runs.claim_run(run.id, "w1").await.unwrap();
    assert_eq!(second.status, RunStatus::Running);
    assert_eq!(second.runner_id.as_deref(), Some("w1"));

    // One progress event per call, no more.
    let events = run_events(&core, &run).await;
    let progress = events
        .iter()
        .filter(|e| **e == EventType::RunProgress)
        .count();
    assert_eq!(progress, 2);

    // A different runner conflicts.
    let err = core.runs.claim_run(run.id, "w2").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunClaimConflict);
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_explicit_claim_respects_thread_exclusivity() {
    let (core, actor, thread) = setup().await;
    let first = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    let second = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();

    core.runs.claim_run(first.id, "w1").await.unwrap();
    let err = core.runs.claim_run(second.id, "w2").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunClaimConflict);
}

#[tokio::test]
async fn test_exactly_once_completion() {
    let (core, actor, thread) = setup().await;
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    core.runs.claim_queued_run("w1").await.unwrap().unwrap();

    let core = Arc::new(core);
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for winner in ["first", "second"] {
        let core = core.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            core.runs
                .complete_run(
                    run.id,
                    RunStatus::Success,
                    &[serde_json::json!(winner)],
                    vec![],
                    None,
                )
                .await
        }));
    }

    let results: Vec<_> = futures_join(handles).await;
    let oks = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| {
            r.as_ref()
                .err()
                .map(|e| e.code() == ErrorCode::RunAlreadyFinalized)
                .unwrap_or(false)
        })
        .count();
    assert_eq!((oks, conflicts), (1, 1));
}

async fn futures_join(
    handles: Vec<tokio::task::JoinHandle<staffx_core::Result<staffx_core::runs::FinalizedRun>>>,
) -> Vec<staffx_core::Result<staffx_core::runs::FinalizedRun>> {
    let mut out = Vec::new();
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

#[tokio::test]
async fn test_empty_messages_rejected_before_state_change() {
    let (core, actor, thread) = setup().await;
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    core.runs.claim_queued_run("w1").await.unwrap().unwrap();

    let err = core
        .runs
        .complete_run(
            run.id,
            RunStatus::Success,
            &[serde_json::json!("   "), serde_json::json!(7)],
            vec![],
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::EmptyRunResult);
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // No state change: the run is still running and completable.
    let current = core.runs.get_run(run.id).await.unwrap();
    assert_eq!(current.status, RunStatus::Running);
    core.runs
        .complete_run(run.id, RunStatus::Success, &[serde_json::json!("ok")], vec![], None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_after_finalize_conflicts() {
    let (core, actor, thread) = setup().await;
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    core.runs.claim_queued_run("w1").await.unwrap().unwrap();
    core.runs
        .complete_run(run.id, RunStatus::Success, &[serde_json::json!("done")], vec![], None)
        .await
        .unwrap();

    let err = core.runs.cancel_run(run.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunAlreadyFinalized);
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Status unchanged, no cancellation event published.
    let current = core.runs.get_run(run.id).await.unwrap();
    assert_eq!(current.status, RunStatus::Success);
    let events = run_events(&core, &run).await;
    assert!(!events.contains(&EventType::RunCancelled));
}

#[tokio::test]
async fn test_cancel_queued_run() {
    let (core, actor, thread) = setup().await;
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();

    let cancelled = core.runs.cancel_run(run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(cancelled.run_error.is_some());

    let events = run_events(&core, &run).await;
    assert_eq!(events.last().copied(), Some(EventType::RunCancelled));

    // A cancelled run is never handed to a worker.
    assert!(core.runs.claim_queued_run("w1").await.unwrap().is_none());

    // Late completion from an executor that missed the cancellation.
    let err = core
        .runs
        .complete_run(run.id, RunStatus::Success, &[serde_json::json!("late")], vec![], None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunAlreadyFinalized);
}

#[tokio::test]
async fn test_failed_completion_publishes_failed_event() {
    let (core, actor, thread) = setup().await;
    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();
    core.runs.claim_queued_run("w1").await.unwrap().unwrap();

    let finalized = core
        .runs
        .complete_run(
            run.id,
            RunStatus::Failed,
            &[serde_json::json!("compilation failed")],
            vec![],
            Some("exit status 1".into()),
        )
        .await
        .unwrap();
    assert_eq!(finalized.run.status, RunStatus::Failed);
    assert_eq!(finalized.run.run_error.as_deref(), Some("exit status 1"));

    let events = run_events(&core, &run).await;
    assert!(events.contains(&EventType::RunFailed));
    assert!(!events.contains(&EventType::RunCompleted));
}
