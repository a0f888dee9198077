//! Projects, threads, and the chat/matrix operations composed over them.
//!
//! A thread is a long-lived conversation scoped to a project. It stores only
//! a seed system id and a lifecycle status; the current graph is always
//! derived through the action chain. The [`ThreadManager`] carries the
//! inbound operations the transport layer exposes: project/thread CRUD,
//! chat messages, and matrix layout patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::chain::{ActionChain, ActionRecord, ActionType, NewAction};
use crate::error::{ErrorCode, Result, StaffError};
use crate::events::{EventLog, EventType, NewEvent};
use crate::graph::{GraphStore, NodeMove, SystemId};
use crate::rbac::{require_editor, require_member, Actor, MemberRole};
use crate::store::Backend;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Open,
    Closed,
    Committed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Committed => "committed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "committed" => Some(Self::Committed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An org-scoped container for threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub org_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One thread row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub project_id: ProjectId,
    pub org_id: Uuid,
    pub title: String,
    pub status: ThreadStatus,
    /// The system resolution falls back to when no action forked one.
    pub seed_system_id: SystemId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub id: ProjectId,
    pub org_id: Uuid,
    pub name: String,
}

/// Input for creating a thread.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub id: ThreadId,
    pub project_id: ProjectId,
    pub org_id: Uuid,
    pub title: String,
    /// Explicit seed for import flows; a fresh empty system when None.
    pub seed_system_id: Option<SystemId>,
    pub created_by: String,
}

/// Partial update for a thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadPatch {
    pub title: Option<String>,
    pub status: Option<ThreadStatus>,
}

/// Result of a matrix layout patch.
#[derive(Debug, Clone)]
pub struct MatrixLayoutOutcome {
    /// How many nodes actually moved.
    pub changed: usize,
    /// Human-readable summary ("no nodes updated" for the no-op case).
    pub detail: String,
    /// The action recording the patch; committed empty when nothing changed.
    pub action: ActionRecord,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Thread Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Service facade for projects, threads, chat, and matrix operations.
#[derive(Clone)]
pub struct ThreadManager {
    backend: Arc<dyn Backend>,
    events: EventLog,
    chain: ActionChain,
    graph: GraphStore,
}

impl ThreadManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        events: EventLog,
        chain: ActionChain,
        graph: GraphStore,
    ) -> Self {
        Self {
            backend,
            events,
            chain,
            graph,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a project. Project names are unique per org; a duplicate is a
    /// Conflict.
    #[instrument(skip(self, actor))]
    pub async fn create_project(
        &self,
        actor: &Actor,
        name: impl Into<String> + std::fmt::Debug,
    ) -> Result<ProjectRecord> {
        let role = self.member_role(actor).await?;
        if !role.can_manage() {
            return Err(StaffError::forbidden("Owner role required to create projects"));
        }

        let name = name.into();
        if name.trim().is_empty() {
            return Err(StaffError::new(
                ErrorCode::MissingRequiredField,
                "Project name must not be blank",
            ));
        }

        let project = self
            .backend
            .create_project(NewProject {
                id: ProjectId::new(),
                org_id: actor.org_id,
                name: name.trim().to_owned(),
            })
            .await?;

        self.events
            .publish(
                NewEvent::new(
                    EventType::ProjectCreated,
                    "project",
                    project.id.0,
                    project.org_id,
                )
                .with_payload(serde_json::json!({ "name": project.name })),
            )
            .await?;

        tracing::info!(project_id = %project.id, "Project created");
        Ok(project)
    }

    /// List the org's projects.
    pub async fn list_projects(&self, actor: &Actor) -> Result<Vec<ProjectRecord>> {
        require_member(self.backend.member_role(actor.org_id, actor.user_id).await?)?;
        self.backend.list_projects(actor.org_id).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Threads
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a thread in a project.
    ///
    /// When no seed system is supplied, a fresh empty one is created in the
    /// same transaction so `current_system` is total from the first read.
    #[instrument(skip(self, actor))]
    pub async fn create_thread(
        &self,
        actor: &Actor,
        project_id: ProjectId,
        title: impl Into<String> + std::fmt::Debug,
        seed_system_id: Option<SystemId>,
    ) -> Result<ThreadRecord> {
        let role = self.member_role(actor).await?;
        require_editor(Some(role))?;

        let title = title.into();
        if title.trim().is_empty() {
            return Err(StaffError::new(
                ErrorCode::MissingRequiredField,
                "Thread title must not be blank",
            ));
        }

        let thread = self
            .backend
            .create_thread(NewThread {
                id: ThreadId::new(),
                project_id,
                org_id: actor.org_id,
                title: title.trim().to_owned(),
                seed_system_id,
                created_by: actor.handle.clone(),
            })
            .await?;

        self.events
            .publish(
                NewEvent::new(EventType::ThreadCreated, "thread", thread.id.0, thread.org_id)
                    .with_payload(serde_json::json!({
                        "project_id": thread.project_id,
                        "title": thread.title,
                        "seed_system_id": thread.seed_system_id,
                    })),
            )
            .await?;

        tracing::info!(thread_id = %thread.id, "Thread created");
        Ok(thread)
    }

    /// List a project's threads.
    pub async fn list_threads(
        &self,
        actor: &Actor,
        project_id: ProjectId,
    ) -> Result<Vec<ThreadRecord>> {
        require_member(self.backend.member_role(actor.org_id, actor.user_id).await?)?;
        let threads = self.backend.list_threads(project_id).await?;
        Ok(threads
            .into_iter()
            .filter(|t| t.org_id == actor.org_id)
            .collect())
    }

    /// Fetch one thread.
    pub async fn get_thread(&self, actor: &Actor, thread_id: ThreadId) -> Result<ThreadRecord> {
        require_member(self.backend.member_role(actor.org_id, actor.user_id).await?)?;
        self.accessible_thread(actor, thread_id).await
    }

    /// Patch a thread's title and/or status.
    ///
    /// Committed threads are terminal: any patch attempt is a Conflict.
    #[instrument(skip(self, actor))]
    pub async fn patch_thread(
        &self,
        actor: &Actor,
        thread_id: ThreadId,
        patch: ThreadPatch,
    ) -> Result<ThreadRecord> {
        let role = self.member_role(actor).await?;
        require_editor(Some(role))?;

        let thread = self.accessible_thread(actor, thread_id).await?;
        if thread.status == ThreadStatus::Committed {
            return Err(StaffError::conflict(
                ErrorCode::ThreadCommitted,
                "Committed threads cannot be modified",
            ));
        }

        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(StaffError::new(
                    ErrorCode::MissingRequiredField,
                    "Thread title must not be blank",
                ));
            }
        }

        let updated = self.backend.update_thread(thread_id, patch).await?;

        self.events
            .publish(
                NewEvent::new(EventType::ThreadUpdated, "thread", updated.id.0, updated.org_id)
                    .with_payload(serde_json::json!({
                        "title": updated.title,
                        "status": updated.status,
                    })),
            )
            .await?;

        Ok(updated)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chat
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a chat message as a non-forking Chat action.
    #[instrument(skip(self, actor, body))]
    pub async fn append_chat_message(
        &self,
        actor: &Actor,
        thread_id: ThreadId,
        body: impl Into<String>,
    ) -> Result<ActionRecord> {
        let role = self.member_role(actor).await?;
        require_editor(Some(role))?;
        let thread = self.open_thread(actor, thread_id).await?;

        let body = body.into();
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(StaffError::new(
                ErrorCode::MissingRequiredField,
                "Chat message must not be blank",
            ));
        }

        let action = self
            .chain
            .append(
                thread_id,
                NewAction::new(ActionType::Chat).by(actor.handle.clone()),
                vec![trimmed.to_owned()],
            )
            .await?;

        self.events
            .publish(
                NewEvent::new(
                    EventType::ChatMessageAppended,
                    "thread",
                    thread_id.0,
                    thread.org_id,
                )
                .with_payload(serde_json::json!({
                    "action_id": action.id,
                    "position": action.position,
                })),
            )
            .await?;

        Ok(action)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Matrix layout
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply layout moves to the thread's current graph.
    ///
    /// Opens a forking Update action, applies the moves to the fork, and,
    /// when nothing actually moved, commits the action empty so the no-op
    /// fork is not retained as the current view. A real change publishes
    /// `thread.matrix.changed` with the changed count.
    #[instrument(skip(self, actor, moves), fields(moves = moves.len()))]
    pub async fn patch_matrix_layout(
        &self,
        actor: &Actor,
        thread_id: ThreadId,
        moves: Vec<NodeMove>,
    ) -> Result<MatrixLayoutOutcome> {
        let role = self.member_role(actor).await?;
        require_editor(Some(role))?;
        let thread = self.open_thread(actor, thread_id).await?;

        if moves.is_empty() {
            return Err(StaffError::new(
                ErrorCode::MissingRequiredField,
                "Layout patch requires at least one move",
            ));
        }

        let action = self
            .chain
            .begin_action(
                thread_id,
                NewAction::new(ActionType::Update)
                    .with_title("Update matrix layout")
                    .by(actor.handle.clone()),
            )
            .await?;
        let fork = action.output_system_id.ok_or_else(|| {
            StaffError::internal("begin_action returned an action without a fork")
        })?;

        let changed = match self.graph.set_node_layout(fork, &moves).await {
            Ok(changed) => changed,
            Err(err) => {
                // The fork is content-identical to its parent; retiring it
                // keeps resolution pointed at the prior snapshot.
                let _ = self.chain.commit_empty(thread_id, action.id).await;
                return Err(err);
            }
        };

        if changed == 0 {
            let action = self.chain.commit_empty(thread_id, action.id).await?;
            tracing::debug!(thread_id = %thread_id, "Layout patch changed nothing");
            return Ok(MatrixLayoutOutcome {
                changed: 0,
                detail: "no nodes updated".to_owned(),
                action,
            });
        }

        self.events
            .publish(
                NewEvent::new(
                    EventType::ThreadMatrixChanged,
                    "thread",
                    thread_id.0,
                    thread.org_id,
                )
                .with_payload(serde_json::json!({
                    "changed": changed,
                    "action_id": action.id,
                    "output_system_id": fork,
                })),
            )
            .await?;

        tracing::info!(thread_id = %thread_id, changed, "Matrix layout updated");
        Ok(MatrixLayoutOutcome {
            changed,
            detail: format!("updated {} node(s)", changed),
            action,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn member_role(&self, actor: &Actor) -> Result<MemberRole> {
        require_member(self.backend.member_role(actor.org_id, actor.user_id).await?)
    }

    async fn accessible_thread(&self, actor: &Actor, thread_id: ThreadId) -> Result<ThreadRecord> {
        let thread = self
            .backend
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;
        if thread.org_id != actor.org_id {
            return Err(StaffError::forbidden("No access to this thread"));
        }
        Ok(thread)
    }

    async fn open_thread(&self, actor: &Actor, thread_id: ThreadId) -> Result<ThreadRecord> {
        let thread = self.accessible_thread(actor, thread_id).await?;
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_status_roundtrip() {
        for status in [
            ThreadStatus::Open,
            ThreadStatus::Closed,
            ThreadStatus::Committed,
        ] {
            assert_eq!(ThreadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ThreadStatus::parse("archived"), None);
    }
}
