//! End-to-end worker loop tests: claim, execute outside the store, complete.

use std::sync::Arc;
use std::time::Duration;

use staffx_core::config::WorkerConfig;
use staffx_core::prelude::*;
use staffx_core::runs::RunWorker;
use uuid::Uuid;

async fn setup() -> (Core, Actor, ThreadRecord) {
    let core = Core::in_memory();
    let org = Uuid::new_v4();
    let actor = Actor::new(Uuid::new_v4(), "ada", org);
    core.backend
        .upsert_member(org, actor.user_id, MemberRole::Editor)
        .await
        .unwrap();
    let owner = Actor::new(Uuid::new_v4(), "oli", org);
    core.backend
        .upsert_member(org, owner.user_id, MemberRole::Owner)
        .await
        .unwrap();
    let project = core.threads.create_project(&owner, "demo").await.unwrap();
    let thread = core
        .threads
        .create_thread(&actor, project.id, "payments", None)
        .await
        .unwrap();
    (core, actor, thread)
}

fn worker_config(runner_id: &str) -> WorkerConfig {
    WorkerConfig {
        runner_id: runner_id.into(),
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
    }
}

async fn wait_terminal(core: &Core, run_id: RunId) -> RunRecord {
    for _ in 0..250 {
        let run = core.runs.get_run(run_id).await.unwrap();
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run never reached a terminal state");
}

#[tokio::test]
async fn test_worker_drives_run_to_success() {
    let (core, actor, thread) = setup().await;

    let run = core
        .runs
        .start_run(
            &actor,
            thread.id,
            RunMode::Direct,
            Some("add a cache".into()),
            None,
            None,
        )
        .await
        .unwrap();

    let worker = RunWorker::new(
        worker_config("w1"),
        core.runs.clone(),
        Arc::new(SimulatedExecutor),
    );
    let handle = worker.start();

    let finished = wait_terminal(&core, run.id).await;
    assert_eq!(finished.status, RunStatus::Success);
    assert_eq!(finished.runner_id.as_deref(), Some("w1"));
    assert_eq!(finished.result_messages.len(), 1);
    assert!(finished.result_messages[0].contains("add a cache"));

    // The worker's completion appended the response action.
    let actions = core.chain.actions(thread.id).await.unwrap();
    let response = actions.last().unwrap();
    assert_eq!(response.action_type, ActionType::ExecuteResponse);
    assert_eq!(response.messages, finished.result_messages);

    assert_eq!(handle.stats().processed(), 1);
    assert_eq!(handle.stats().succeeded(), 1);

    handle.shutdown();
    handle.join().await;
}

struct FailingExecutor;

#[async_trait::async_trait]
impl AgentExecutor for FailingExecutor {
    async fn execute(&self, _request: ExecutionRequest) -> staffx_core::Result<ExecutionOutcome> {
        Ok(ExecutionOutcome {
            status: ExecutionStatus::Failed,
            messages: vec![],
            changes: vec![],
            error: Some("model refused".into()),
        })
    }
}

#[tokio::test]
async fn test_worker_records_failure_with_fallback_message() {
    let (core, actor, thread) = setup().await;

    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();

    let worker = RunWorker::new(
        worker_config("w2"),
        core.runs.clone(),
        Arc::new(FailingExecutor),
    );
    let handle = worker.start();

    let finished = wait_terminal(&core, run.id).await;
    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(finished.run_error.as_deref(), Some("model refused"));
    // The empty executor output was replaced so the completion is valid.
    assert_eq!(finished.result_messages, vec!["model refused"]);

    assert_eq!(handle.stats().failed(), 1);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test]
async fn test_two_workers_one_thread_serialize() {
    let (core, actor, thread) = setup().await;

    let mut run_ids = Vec::new();
    for i in 0..3 {
        let run = core
            .runs
            .start_run(
                &actor,
                thread.id,
                RunMode::Direct,
                Some(format!("step {}", i)),
                None,
                None,
            )
            .await
            .unwrap();
        run_ids.push(run.id);
    }

    let a = RunWorker::new(
        worker_config("wa"),
        core.runs.clone(),
        Arc::new(SimulatedExecutor),
    )
    .start();
    let b = RunWorker::new(
        worker_config("wb"),
        core.runs.clone(),
        Arc::new(SimulatedExecutor),
    )
    .start();

    for run_id in &run_ids {
        let finished = wait_terminal(&core, *run_id).await;
        assert_eq!(finished.status, RunStatus::Success);
    }

    // Both workers together processed every run exactly once.
    assert_eq!(a.stats().processed() + b.stats().processed(), 3);

    // Responses were appended one at a time, in claim order.
    let actions = core.chain.actions(thread.id).await.unwrap();
    let responses: Vec<_> = actions
        .iter()
        .filter(|a| a.action_type == ActionType::ExecuteResponse)
        .collect();
    assert_eq!(responses.len(), 3);

    a.shutdown();
    b.shutdown();
    a.join().await;
    b.join().await;
}

#[tokio::test]
async fn test_late_completion_after_cancel_is_rejected() {
    let (core, actor, thread) = setup().await;

    let run = core
        .runs
        .start_run(&actor, thread.id, RunMode::Direct, None, None, None)
        .await
        .unwrap();

    // A runner claims the run, then the user cancels while it "executes".
    core.runs.claim_run(run.id, "w1").await.unwrap();
    core.runs.cancel_run(run.id).await.unwrap();

    let err = core
        .runs
        .complete_run(
            run.id,
            RunStatus::Success,
            &[serde_json::json!("too late")],
            vec![],
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RunAlreadyFinalized);

    let current = core.runs.get_run(run.id).await.unwrap();
    assert_eq!(current.status, RunStatus::Cancelled);
}
