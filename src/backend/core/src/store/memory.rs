//! In-memory backend for tests and local simulation.
//!
//! A single mutex over the whole state gives every trait method the same
//! all-or-nothing visibility a store transaction would; batch operations
//! mutate a clone and swap it in, so a failing write never leaves a partial
//! batch behind. Never held across an await.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::chain::{ActionId, ActionRecord, ActionType, NewAction};
use crate::content::{DocHash, DocumentRecord, NewDocument};
use crate::error::{ErrorCode, Result, StaffError};
use crate::events::{EventFilter, EventPosition, NewEvent, StaffXEvent};
use crate::graph::{
    node_layout, with_layout, ArtifactId, ArtifactRecord, ConcernId, ConcernRecord, EdgeId,
    EdgeRecord, GraphWrite, MatrixRefRecord, NodeId, NodeKind, NodeRecord, SystemId, SystemRecord,
};
use crate::rbac::MemberRole;
use crate::runs::{ClaimOutcome, FinalizeRun, FinalizedRun, NewRun, RunId, RunRecord, RunStatus};
use crate::threads::{
    NewProject, NewThread, ProjectId, ProjectRecord, ThreadId, ThreadPatch, ThreadRecord,
};

use super::Backend;

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

/// All rows scoped to one system snapshot.
#[derive(Debug, Clone, Default)]
struct SystemRows {
    nodes: BTreeMap<NodeId, NodeRecord>,
    edges: BTreeMap<EdgeId, EdgeRecord>,
    concerns: BTreeMap<ConcernId, ConcernRecord>,
    matrix_refs: BTreeSet<MatrixRefRecord>,
    artifacts: BTreeMap<ArtifactId, ArtifactRecord>,
}

#[derive(Debug, Default)]
struct MemState {
    members: HashMap<(Uuid, Uuid), MemberRole>,
    projects: HashMap<ProjectId, ProjectRecord>,
    threads: HashMap<ThreadId, ThreadRecord>,
    documents: HashMap<DocHash, DocumentRecord>,
    systems: HashMap<SystemId, SystemRecord>,
    system_rows: HashMap<SystemId, SystemRows>,
    actions: HashMap<ThreadId, Vec<ActionRecord>>,
    runs: HashMap<RunId, RunRecord>,
    events: Vec<StaffXEvent>,
    next_event_id: i64,
}

/// In-memory [`Backend`] implementation.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemState {
                next_event_id: 1,
                ..MemState::default()
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Internal helpers
// ═══════════════════════════════════════════════════════════════════════════════

fn next_position(actions: &[ActionRecord]) -> i64 {
    actions.last().map(|a| a.position + 1).unwrap_or(1)
}

/// Resolve the current system for a thread from its actions and seed.
fn resolve_current(state: &MemState, thread: &ThreadRecord) -> SystemId {
    state
        .actions
        .get(&thread.id)
        .and_then(|actions| {
            actions
                .iter()
                .rev()
                .find(|a| a.resolves())
                .and_then(|a| a.output_system_id)
        })
        .unwrap_or(thread.seed_system_id)
}

/// Apply one write to a system's rows, returning 1 if a row changed.
fn apply_write(
    documents: &HashMap<DocHash, DocumentRecord>,
    rows: &mut SystemRows,
    system_id: SystemId,
    write: GraphWrite,
) -> Result<usize> {
    match write {
        GraphWrite::UpsertNode {
            id,
            kind,
            name,
            parent,
            metadata,
        } => {
            if kind == NodeKind::Root && parent.is_some() {
                return Err(StaffError::new(
                    ErrorCode::RootNodeWithParent,
                    "Root nodes cannot have a parent",
                ));
            }
            if let Some(parent) = parent {
                if !rows.nodes.contains_key(&parent) {
                    return Err(StaffError::not_found("node", parent.to_string()));
                }
            }
            let record = NodeRecord {
                system_id,
                id,
                kind,
                name,
                parent,
                metadata,
            };
            if rows.nodes.get(&id) == Some(&record) {
                return Ok(0);
            }
            rows.nodes.insert(id, record);
            Ok(1)
        }

        GraphWrite::UpsertEdge {
            id,
            kind,
            from,
            to,
            metadata,
        } => {
            for node in [from, to] {
                if !rows.nodes.contains_key(&node) {
                    return Err(StaffError::not_found("node", node.to_string()));
                }
            }
            let record = EdgeRecord {
                system_id,
                id,
                kind,
                from,
                to,
                metadata,
            };
            if rows.edges.get(&id) == Some(&record) {
                return Ok(0);
            }
            rows.edges.insert(id, record);
            Ok(1)
        }

        GraphWrite::UpsertConcern { id, name, position } => {
            let record = ConcernRecord {
                system_id,
                id,
                name,
                position,
            };
            if rows.concerns.get(&id) == Some(&record) {
                return Ok(0);
            }
            rows.concerns.insert(id, record);
            Ok(1)
        }

        GraphWrite::SetNodeLayout { node_id, x, y } => {
            let node = rows
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| StaffError::not_found("node", node_id.to_string()))?;
            if node_layout(node) == Some((x, y)) {
                return Ok(0);
            }
            node.metadata = with_layout(&node.metadata, x, y);
            Ok(1)
        }

        GraphWrite::AttachMatrixRef {
            node_id,
            concern_id,
            ref_kind,
            doc_hash,
        } => {
            if !rows.nodes.contains_key(&node_id) {
                return Err(StaffError::not_found("node", node_id.to_string()));
            }
            if !rows.concerns.contains_key(&concern_id) {
                return Err(StaffError::not_found("concern", concern_id.to_string()));
            }
            if !documents.contains_key(&doc_hash) {
                return Err(StaffError::not_found("document", doc_hash.as_str()));
            }
            let inserted = rows.matrix_refs.insert(MatrixRefRecord {
                system_id,
                node_id,
                concern_id,
                ref_kind,
                doc_hash,
            });
            Ok(usize::from(inserted))
        }

        GraphWrite::DetachMatrixRef {
            node_id,
            concern_id,
            ref_kind,
            doc_hash,
        } => {
            let removed = rows.matrix_refs.remove(&MatrixRefRecord {
                system_id,
                node_id,
                concern_id,
                ref_kind,
                doc_hash,
            });
            Ok(usize::from(removed))
        }

        GraphWrite::PutArtifact {
            id,
            node_id,
            concern_id,
            artifact_type,
            language,
            content,
        } => {
            if !rows.nodes.contains_key(&node_id) {
                return Err(StaffError::not_found("node", node_id.to_string()));
            }
            if !rows.concerns.contains_key(&concern_id) {
                return Err(StaffError::not_found("concern", concern_id.to_string()));
            }
            if let Some(existing) = rows.artifacts.get(&id) {
                if existing.node_id == node_id
                    && existing.concern_id == concern_id
                    && existing.artifact_type == artifact_type
                    && existing.language == language
                    && existing.content == content
                {
                    return Ok(0);
                }
            }
            rows.artifacts.insert(
                id,
                ArtifactRecord {
                    system_id,
                    id,
                    node_id,
                    concern_id,
                    artifact_type,
                    language,
                    content,
                    updated_at: Utc::now(),
                },
            );
            Ok(1)
        }
    }
}

fn already_finalized(run: &RunRecord) -> StaffError {
    StaffError::conflict(
        ErrorCode::RunAlreadyFinalized,
        format!("Run is already {}", run.status),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend implementation
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl Backend for MemoryBackend {
    // ── Membership ──────────────────────────────────────────────────────────

    async fn upsert_member(&self, org_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<()> {
        self.state.lock().members.insert((org_id, user_id), role);
        Ok(())
    }

    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>> {
        Ok(self.state.lock().members.get(&(org_id, user_id)).copied())
    }

    // ── Projects & Threads ──────────────────────────────────────────────────

    async fn create_project(&self, new: NewProject) -> Result<ProjectRecord> {
        let mut state = self.state.lock();
        let duplicate = state
            .projects
            .values()
            .any(|p| p.org_id == new.org_id && p.name == new.name);
        if duplicate {
            return Err(StaffError::conflict(
                ErrorCode::DuplicateProjectName,
                format!("Project name already in use: {}", new.name),
            ));
        }
        let record = ProjectRecord {
            id: new.id,
            org_id: new.org_id,
            name: new.name,
            created_at: Utc::now(),
        };
        state.projects.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_projects(&self, org_id: Uuid) -> Result<Vec<ProjectRecord>> {
        let state = self.state.lock();
        let mut projects: Vec<_> = state
            .projects
            .values()
            .filter(|p| p.org_id == org_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn create_thread(&self, new: NewThread) -> Result<ThreadRecord> {
        let mut state = self.state.lock();

        let project = state
            .projects
            .get(&new.project_id)
            .ok_or_else(|| StaffError::not_found("project", new.project_id.to_string()))?;
        if project.org_id != new.org_id {
            return Err(StaffError::forbidden("Project belongs to another org"));
        }

        let seed = match new.seed_system_id {
            Some(seed) => {
                if !state.systems.contains_key(&seed) {
                    return Err(StaffError::not_found("system", seed.to_string()));
                }
                seed
            }
            None => {
                let seed = SystemId::new();
                state.systems.insert(
                    seed,
                    SystemRecord {
                        id: seed,
                        forked_from: None,
                        created_at: Utc::now(),
                    },
                );
                state.system_rows.insert(seed, SystemRows::default());
                seed
            }
        };

        let now = Utc::now();
        let record = ThreadRecord {
            id: new.id,
            project_id: new.project_id,
            org_id: new.org_id,
            title: new.title,
            status: crate::threads::ThreadStatus::Open,
            seed_system_id: seed,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        state.threads.insert(record.id, record.clone());
        state.actions.entry(record.id).or_default();
        Ok(record)
    }

    async fn get_thread(&self, id: ThreadId) -> Result<Option<ThreadRecord>> {
        Ok(self.state.lock().threads.get(&id).cloned())
    }

    async fn list_threads(&self, project_id: ProjectId) -> Result<Vec<ThreadRecord>> {
        let state = self.state.lock();
        let mut threads: Vec<_> = state
            .threads
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        threads.sort_by_key(|t| t.created_at);
        Ok(threads)
    }

    async fn update_thread(&self, id: ThreadId, patch: ThreadPatch) -> Result<ThreadRecord> {
        let mut state = self.state.lock();
        let thread = state
            .threads
            .get_mut(&id)
            .ok_or_else(|| StaffError::not_found("thread", id.to_string()))?;
        if let Some(title) = patch.title {
            thread.title = title;
        }
        if let Some(status) = patch.status {
            thread.status = status;
        }
        thread.updated_at = Utc::now();
        Ok(thread.clone())
    }

    // ── Documents ───────────────────────────────────────────────────────────

    async fn put_document(&self, new: NewDocument) -> Result<DocumentRecord> {
        let mut state = self.state.lock();
        let hash = new.hash();
        if let Some(existing) = state.documents.get(&hash) {
            return Ok(existing.clone());
        }
        let record = DocumentRecord {
            hash: hash.clone(),
            kind: new.kind,
            title: new.title,
            language: new.language,
            body: new.body,
            supersedes: new.supersedes,
            created_at: Utc::now(),
        };
        state.documents.insert(hash, record.clone());
        Ok(record)
    }

    async fn get_document(&self, hash: &DocHash) -> Result<Option<DocumentRecord>> {
        Ok(self.state.lock().documents.get(hash).cloned())
    }

    // ── Action Chain ────────────────────────────────────────────────────────

    async fn current_system(&self, thread_id: ThreadId) -> Result<SystemId> {
        let state = self.state.lock();
        let thread = state
            .threads
            .get(&thread_id)
            .ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;
        Ok(resolve_current(&state, thread))
    }

    async fn begin_action(&self, thread_id: ThreadId, new: NewAction) -> Result<ActionRecord> {
        let mut state = self.state.lock();
        let thread = state
            .threads
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;

        let current = resolve_current(&state, &thread);
        let rows = state
            .system_rows
            .get(&current)
            .cloned()
            .ok_or_else(|| StaffError::internal("thread has no current system"))?;

        // Genuine copy-on-write: a fresh id per fork, never in-place reuse.
        let fork = SystemId::new();
        state.systems.insert(
            fork,
            SystemRecord {
                id: fork,
                forked_from: Some(current),
                created_at: Utc::now(),
            },
        );
        state.system_rows.insert(fork, rows);

        let actions = state.actions.entry(thread_id).or_default();
        let record = ActionRecord {
            id: new.id,
            thread_id,
            position: next_position(actions),
            action_type: new.action_type,
            title: new.title,
            output_system_id: Some(fork),
            empty: false,
            messages: vec![],
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        actions.push(record.clone());
        Ok(record)
    }

    async fn mark_action_empty(
        &self,
        thread_id: ThreadId,
        action_id: ActionId,
    ) -> Result<ActionRecord> {
        let mut state = self.state.lock();
        let actions = state
            .actions
            .get_mut(&thread_id)
            .ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;
        let action = actions
            .iter_mut()
            .find(|a| a.id == action_id)
            .ok_or_else(|| StaffError::not_found("action", action_id.to_string()))?;
        action.empty = true;
        Ok(action.clone())
    }

    async fn append_action(
        &self,
        thread_id: ThreadId,
        new: NewAction,
        messages: Vec<String>,
    ) -> Result<ActionRecord> {
        let mut state = self.state.lock();
        if !state.threads.contains_key(&thread_id) {
            return Err(StaffError::not_found("thread", thread_id.to_string()));
        }
        let actions = state.actions.entry(thread_id).or_default();
        let record = ActionRecord {
            id: new.id,
            thread_id,
            position: next_position(actions),
            action_type: new.action_type,
            title: new.title,
            output_system_id: None,
            empty: false,
            messages,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        actions.push(record.clone());
        Ok(record)
    }

    async fn get_action(&self, action_id: ActionId) -> Result<Option<ActionRecord>> {
        let state = self.state.lock();
        Ok(state
            .actions
            .values()
            .flat_map(|actions| actions.iter())
            .find(|a| a.id == action_id)
            .cloned())
    }

    async fn list_actions(&self, thread_id: ThreadId) -> Result<Vec<ActionRecord>> {
        Ok(self
            .state
            .lock()
            .actions
            .get(&thread_id)
            .cloned()
            .unwrap_or_default())
    }

    // ── Graph ───────────────────────────────────────────────────────────────

    async fn get_system(&self, id: SystemId) -> Result<Option<SystemRecord>> {
        Ok(self.state.lock().systems.get(&id).cloned())
    }

    async fn apply_graph_writes(
        &self,
        system_id: SystemId,
        writes: Vec<GraphWrite>,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        let MemState {
            documents,
            system_rows,
            ..
        } = &mut *state;

        // Mutate a clone; swap in only if the whole batch succeeds.
        let mut rows = system_rows
            .get(&system_id)
            .cloned()
            .ok_or_else(|| StaffError::not_found("system", system_id.to_string()))?;

        let mut changed = 0;
        for write in writes {
            changed += apply_write(documents, &mut rows, system_id, write)?;
        }

        system_rows.insert(system_id, rows);
        Ok(changed)
    }

    async fn list_nodes(&self, system_id: SystemId) -> Result<Vec<NodeRecord>> {
        let state = self.state.lock();
        let rows = state
            .system_rows
            .get(&system_id)
            .ok_or_else(|| StaffError::not_found("system", system_id.to_string()))?;
        Ok(rows.nodes.values().cloned().collect())
    }

    async fn list_edges(&self, system_id: SystemId) -> Result<Vec<EdgeRecord>> {
        let state = self.state.lock();
        let rows = state
            .system_rows
            .get(&system_id)
            .ok_or_else(|| StaffError::not_found("system", system_id.to_string()))?;
        Ok(rows.edges.values().cloned().collect())
    }

    async fn list_concerns(&self, system_id: SystemId) -> Result<Vec<ConcernRecord>> {
        let state = self.state.lock();
        let rows = state
            .system_rows
            .get(&system_id)
            .ok_or_else(|| StaffError::not_found("system", system_id.to_string()))?;
        let mut concerns: Vec<_> = rows.concerns.values().cloned().collect();
        concerns.sort_by_key(|c| c.position);
        Ok(concerns)
    }

    async fn list_matrix_refs(&self, system_id: SystemId) -> Result<Vec<MatrixRefRecord>> {
        let state = self.state.lock();
        let rows = state
            .system_rows
            .get(&system_id)
            .ok_or_else(|| StaffError::not_found("system", system_id.to_string()))?;
        Ok(rows.matrix_refs.iter().cloned().collect())
    }

    async fn get_artifact(
        &self,
        system_id: SystemId,
        id: ArtifactId,
    ) -> Result<Option<ArtifactRecord>> {
        let state = self.state.lock();
        let rows = state
            .system_rows
            .get(&system_id)
            .ok_or_else(|| StaffError::not_found("system", system_id.to_string()))?;
        Ok(rows.artifacts.get(&id).cloned())
    }

    // ── Run Queue ───────────────────────────────────────────────────────────

    async fn insert_run(&self, new: NewRun) -> Result<RunRecord> {
        let mut state = self.state.lock();
        let thread = state
            .threads
            .get(&new.thread_id)
            .ok_or_else(|| StaffError::not_found("thread", new.thread_id.to_string()))?;

        let record = RunRecord {
            id: new.id,
            thread_id: new.thread_id,
            org_id: thread.org_id,
            mode: new.mode,
            model: new.model,
            prompt: new.prompt,
            status: RunStatus::Queued,
            runner_id: None,
            chat_message_id: new.chat_message_id,
            result_messages: vec![],
            result_changes: serde_json::json!([]),
            run_error: None,
            created_by: new.created_by,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        state.runs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.state.lock().runs.get(&id).cloned())
    }

    async fn claim_queued_run(&self, runner_id: &str) -> Result<Option<RunRecord>> {
        let mut state = self.state.lock();

        let mut queued: Vec<(chrono::DateTime<Utc>, RunId, ThreadId)> = state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Queued)
            .map(|r| (r.created_at, r.id, r.thread_id))
            .collect();
        queued.sort_by_key(|(created_at, id, _)| (*created_at, id.0));

        for (_, run_id, thread_id) in queued {
            let thread_busy = state
                .runs
                .values()
                .any(|r| r.thread_id == thread_id && r.status == RunStatus::Running);
            if thread_busy {
                continue;
            }
            let run = state.runs.get_mut(&run_id).expect("run just listed");
            run.status = RunStatus::Running;
            run.runner_id = Some(runner_id.to_owned());
            run.started_at = Some(Utc::now());
            return Ok(Some(run.clone()));
        }

        Ok(None)
    }

    async fn claim_run(&self, id: RunId, runner_id: &str) -> Result<ClaimOutcome> {
        let mut state = self.state.lock();

        let (status, thread_id, current_runner) = {
            let run = state
                .runs
                .get(&id)
                .ok_or_else(|| StaffError::not_found("run", id.to_string()))?;
            (run.status, run.thread_id, run.runner_id.clone())
        };

        match status {
            RunStatus::Queued => {
                let thread_busy = state
                    .runs
                    .values()
                    .any(|r| r.id != id && r.thread_id == thread_id && r.status == RunStatus::Running);
                if thread_busy {
                    return Err(StaffError::conflict(
                        ErrorCode::RunClaimConflict,
                        "Another run is already running for this thread",
                    ));
                }
                let run = state.runs.get_mut(&id).expect("run just fetched");
                run.status = RunStatus::Running;
                run.runner_id = Some(runner_id.to_owned());
                run.started_at = Some(Utc::now());
                Ok(ClaimOutcome::Claimed(run.clone()))
            }
            RunStatus::Running => {
                if current_runner.as_deref() == Some(runner_id) {
                    let run = state.runs.get(&id).expect("run just fetched");
                    Ok(ClaimOutcome::AlreadyOwned(run.clone()))
                } else {
                    Err(StaffError::conflict(
                        ErrorCode::RunClaimConflict,
                        "Run is already claimed by another runner",
                    ))
                }
            }
            _ => {
                let run = state.runs.get(&id).expect("run just fetched");
                Err(already_finalized(run))
            }
        }
    }

    async fn finalize_run(&self, id: RunId, finalize: FinalizeRun) -> Result<FinalizedRun> {
        let mut state = self.state.lock();

        let run = state
            .runs
            .get(&id)
            .ok_or_else(|| StaffError::not_found("run", id.to_string()))?;
        if run.status.is_terminal() {
            return Err(already_finalized(run));
        }
        let thread_id = run.thread_id;
        let responder = run
            .runner_id
            .clone()
            .unwrap_or_else(|| "assistant".to_owned());

        let run = state.runs.get_mut(&id).expect("run just fetched");
        run.status = finalize.status;
        run.result_messages = finalize.messages.clone();
        run.result_changes = finalize.changes;
        run.run_error = finalize.error;
        run.finished_at = Some(Utc::now());
        let finalized_run = run.clone();

        let actions = state.actions.entry(thread_id).or_default();
        let action = ActionRecord {
            id: finalize.response_action_id,
            thread_id,
            position: next_position(actions),
            action_type: ActionType::ExecuteResponse,
            title: None,
            output_system_id: None,
            empty: false,
            messages: finalize.messages,
            created_by: Some(responder),
            created_at: Utc::now(),
        };
        actions.push(action.clone());

        Ok(FinalizedRun {
            run: finalized_run,
            action,
        })
    }

    async fn cancel_run(&self, id: RunId, error: &str) -> Result<RunRecord> {
        let mut state = self.state.lock();
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| StaffError::not_found("run", id.to_string()))?;
        if run.status.is_terminal() {
            return Err(already_finalized(run));
        }
        run.status = RunStatus::Cancelled;
        run.run_error = Some(error.to_owned());
        run.finished_at = Some(Utc::now());
        Ok(run.clone())
    }

    // ── Event Log ───────────────────────────────────────────────────────────

    async fn append_event(&self, new: NewEvent) -> Result<StaffXEvent> {
        let mut state = self.state.lock();
        let id = state.next_event_id;
        state.next_event_id += 1;
        let event = StaffXEvent {
            id,
            event_type: new.event_type,
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            org_id: new.org_id,
            trace_id: new.trace_id,
            payload: new.payload,
            version: new.version,
            occurred_at: Utc::now(),
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<StaffXEvent>> {
        let state = self.state.lock();

        let mut events: Vec<StaffXEvent> = state
            .events
            .iter()
            .filter(|e| filter.org_id.map_or(true, |org| e.org_id == org))
            .filter(|e| {
                filter
                    .aggregate_type
                    .as_deref()
                    .map_or(true, |t| e.aggregate_type == t)
            })
            .filter(|e| filter.aggregate_id.map_or(true, |id| e.aggregate_id == id))
            .filter(|e| match filter.since {
                Some(EventPosition::Cursor { occurred_at, id }) => {
                    (e.occurred_at, e.id) > (occurred_at, id)
                }
                Some(EventPosition::Timestamp(ts)) => e.occurred_at > ts,
                None => true,
            })
            .cloned()
            .collect();

        events.sort_by_key(|e| (e.occurred_at, e.id));
        events.truncate(filter.limit.max(0) as usize);
        Ok(events)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    async fn seeded_thread(backend: &MemoryBackend) -> (ThreadRecord, ProjectRecord) {
        let org = Uuid::new_v4();
        let project = backend
            .create_project(NewProject {
                id: ProjectId::new(),
                org_id: org,
                name: "demo".into(),
            })
            .await
            .unwrap();
        let thread = backend
            .create_thread(NewThread {
                id: ThreadId::new(),
                project_id: project.id,
                org_id: org,
                title: "payments".into(),
                seed_system_id: None,
                created_by: "ada".into(),
            })
            .await
            .unwrap();
        (thread, project)
    }

    #[tokio::test]
    async fn test_begin_action_forks_fresh_system() {
        let backend = MemoryBackend::new();
        let (thread, _) = seeded_thread(&backend).await;

        let seed = backend.current_system(thread.id).await.unwrap();
        assert_eq!(seed, thread.seed_system_id);

        let action = backend
            .begin_action(thread.id, NewAction::new(ActionType::Edit))
            .await
            .unwrap();
        let fork = action.output_system_id.unwrap();
        assert_ne!(fork, seed, "fork must allocate a new system id");

        let system = backend.get_system(fork).await.unwrap().unwrap();
        assert_eq!(system.forked_from, Some(seed));
        assert_eq!(backend.current_system(thread.id).await.unwrap(), fork);
    }

    #[tokio::test]
    async fn test_fork_isolates_prior_snapshot() {
        let backend = MemoryBackend::new();
        let (thread, _) = seeded_thread(&backend).await;

        let a1 = backend
            .begin_action(thread.id, NewAction::new(ActionType::Edit))
            .await
            .unwrap();
        let s1 = a1.output_system_id.unwrap();
        let node = NodeId::new();
        backend
            .apply_graph_writes(
                s1,
                vec![GraphWrite::UpsertNode {
                    id: node,
                    kind: NodeKind::Root,
                    name: "system".into(),
                    parent: None,
                    metadata: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();

        let a2 = backend
            .begin_action(thread.id, NewAction::new(ActionType::Edit))
            .await
            .unwrap();
        let s2 = a2.output_system_id.unwrap();
        backend
            .apply_graph_writes(
                s2,
                vec![GraphWrite::UpsertNode {
                    id: node,
                    kind: NodeKind::Root,
                    name: "renamed".into(),
                    parent: None,
                    metadata: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();

        // The earlier snapshot still reads the old name.
        let old = backend.list_nodes(s1).await.unwrap();
        assert_eq!(old[0].name, "system");
        let new = backend.list_nodes(s2).await.unwrap();
        assert_eq!(new[0].name, "renamed");
    }

    #[tokio::test]
    async fn test_empty_commit_rolls_resolution_back() {
        let backend = MemoryBackend::new();
        let (thread, _) = seeded_thread(&backend).await;

        let action = backend
            .begin_action(thread.id, NewAction::new(ActionType::Update))
            .await
            .unwrap();
        let fork = action.output_system_id.unwrap();
        assert_eq!(backend.current_system(thread.id).await.unwrap(), fork);

        backend.mark_action_empty(thread.id, action.id).await.unwrap();
        assert_eq!(
            backend.current_system(thread.id).await.unwrap(),
            thread.seed_system_id
        );
        // The fork stays addressable even though resolution skips it.
        assert!(backend.get_system(fork).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_partial_writes() {
        let backend = MemoryBackend::new();
        let (thread, _) = seeded_thread(&backend).await;
        let system = backend.current_system(thread.id).await.unwrap();

        let node = NodeId::new();
        let err = backend
            .apply_graph_writes(
                system,
                vec![
                    GraphWrite::UpsertNode {
                        id: node,
                        kind: NodeKind::Root,
                        name: "system".into(),
                        parent: None,
                        metadata: serde_json::json!({}),
                    },
                    // References a node that does not exist: whole batch fails.
                    GraphWrite::SetNodeLayout {
                        node_id: NodeId::new(),
                        x: 1.0,
                        y: 2.0,
                    },
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NodeNotFound);

        assert!(backend.list_nodes(system).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_positions_are_strictly_increasing() {
        let backend = MemoryBackend::new();
        let (thread, _) = seeded_thread(&backend).await;

        let a1 = backend
            .append_action(thread.id, NewAction::new(ActionType::Chat), vec!["hi".into()])
            .await
            .unwrap();
        let a2 = backend
            .begin_action(thread.id, NewAction::new(ActionType::Edit))
            .await
            .unwrap();
        let a3 = backend
            .append_action(thread.id, NewAction::new(ActionType::Chat), vec!["yo".into()])
            .await
            .unwrap();

        assert_eq!((a1.position, a2.position, a3.position), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_duplicate_project_name_conflicts() {
        let backend = MemoryBackend::new();
        let org = Uuid::new_v4();
        backend
            .create_project(NewProject {
                id: ProjectId::new(),
                org_id: org,
                name: "demo".into(),
            })
            .await
            .unwrap();
        let err = backend
            .create_project(NewProject {
                id: ProjectId::new(),
                org_id: org,
                name: "demo".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateProjectName);
    }
}
