//! The action chain: the versioning core.
//!
//! Every mutation to a thread's graph is recorded as an Action with a
//! strictly increasing, never-reused `position`. An Action that changed the
//! graph carries an `output_system_id`, a fresh copy-on-write fork of the
//! system that was current when it began. "The graph as it stands now" is
//! always derived by [`ActionChain::current_system`]; no row stores it.
//!
//! `begin_action` is atomic with its fork: if copying rows fails, the Action
//! never becomes visible. A fork that turns out to change nothing is marked
//! with `commit_empty`: the position slot stays consumed, the forked system
//! stays addressable (its rows equal the prior snapshot), but resolution
//! skips it so no-op edits do not advance the current view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Result, StaffError};
use crate::graph::SystemId;
use crate::store::Backend;
use crate::threads::ThreadId;

// ═══════════════════════════════════════════════════════════════════════════════
// Action Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of logical operation an action records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Chat,
    Edit,
    Import,
    Plan,
    PlanResponse,
    Execute,
    ExecuteResponse,
    Update,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Edit => "edit",
            Self::Import => "import",
            Self::Plan => "plan",
            Self::PlanResponse => "plan_response",
            Self::Execute => "execute",
            Self::ExecuteResponse => "execute_response",
            Self::Update => "update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "edit" => Some(Self::Edit),
            "import" => Some(Self::Import),
            "plan" => Some(Self::Plan),
            "plan_response" => Some(Self::PlanResponse),
            "execute" => Some(Self::Execute),
            "execute_response" => Some(Self::ExecuteResponse),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a thread's action chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub thread_id: ThreadId,
    /// Strictly increasing per thread; slots are never reused.
    pub position: i64,
    pub action_type: ActionType,
    pub title: Option<String>,
    /// Non-null only when this action forked a new system.
    pub output_system_id: Option<SystemId>,
    /// Set by `commit_empty`: the fork changed nothing and resolution skips it.
    pub empty: bool,
    pub messages: Vec<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActionRecord {
    /// Whether this action contributes a usable snapshot to resolution.
    pub fn resolves(&self) -> bool {
        self.output_system_id.is_some() && !self.empty
    }
}

/// Input for inserting an action.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub id: ActionId,
    pub action_type: ActionType,
    pub title: Option<String>,
    pub created_by: Option<String>,
}

impl NewAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            id: ActionId::new(),
            action_type,
            title: None,
            created_by: None,
        }
    }

    pub fn with_id(mut self, id: ActionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn by(mut self, handle: impl Into<String>) -> Self {
        self.created_by = Some(handle.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Action Chain Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service facade for the per-thread action chain.
#[derive(Clone)]
pub struct ActionChain {
    backend: Arc<dyn Backend>,
}

impl ActionChain {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Resolve the thread's current system.
    ///
    /// This is the single read path every component uses to find the graph
    /// as it stands now: the newest action with a usable fork, falling back
    /// to the thread's seed system.
    pub async fn current_system(&self, thread_id: ThreadId) -> Result<SystemId> {
        self.backend.current_system(thread_id).await
    }

    /// Open a forking action: allocate the next position, insert the action,
    /// and fork the current system copy-on-write.
    ///
    /// All graph writes for the logical operation must target the returned
    /// `output_system_id`.
    #[instrument(skip(self, new), fields(action_type = %new.action_type))]
    pub async fn begin_action(&self, thread_id: ThreadId, new: NewAction) -> Result<ActionRecord> {
        let action = self.backend.begin_action(thread_id, new).await?;
        tracing::debug!(
            action_id = %action.id,
            position = action.position,
            output_system = ?action.output_system_id,
            "Action opened with fork"
        );
        Ok(action)
    }

    /// Mark a forking action as empty: its writes changed nothing, so the
    /// fork must not be treated as a new snapshot.
    pub async fn commit_empty(
        &self,
        thread_id: ThreadId,
        action_id: ActionId,
    ) -> Result<ActionRecord> {
        let action = self.backend.mark_action_empty(thread_id, action_id).await?;
        tracing::debug!(action_id = %action.id, position = action.position, "Action committed empty");
        Ok(action)
    }

    /// Append a non-forking action (chat message, run response) with its
    /// message rows, in one transaction.
    pub async fn append(
        &self,
        thread_id: ThreadId,
        new: NewAction,
        messages: Vec<String>,
    ) -> Result<ActionRecord> {
        self.backend.append_action(thread_id, new, messages).await
    }

    /// Fetch one action by id.
    pub async fn get(&self, action_id: ActionId) -> Result<ActionRecord> {
        self.backend
            .get_action(action_id)
            .await?
            .ok_or_else(|| StaffError::not_found("action", action_id.to_string()))
    }

    /// List a thread's actions in position order.
    pub async fn actions(&self, thread_id: ThreadId) -> Result<Vec<ActionRecord>> {
        self.backend.list_actions(thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_roundtrip() {
        for ty in [
            ActionType::Chat,
            ActionType::Edit,
            ActionType::Import,
            ActionType::Plan,
            ActionType::PlanResponse,
            ActionType::Execute,
            ActionType::ExecuteResponse,
            ActionType::Update,
        ] {
            assert_eq!(ActionType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(ActionType::parse("merge"), None);
    }

    #[test]
    fn test_resolves_requires_non_empty_fork() {
        let mut action = ActionRecord {
            id: ActionId::new(),
            thread_id: ThreadId::new(),
            position: 1,
            action_type: ActionType::Update,
            title: None,
            output_system_id: Some(SystemId::new()),
            empty: false,
            messages: vec![],
            created_by: None,
            created_at: Utc::now(),
        };
        assert!(action.resolves());

        action.empty = true;
        assert!(!action.resolves());

        action.empty = false;
        action.output_system_id = None;
        assert!(!action.resolves());
    }
}
