//! Storage abstraction.
//!
//! Every cross-row invariant in the core (per-thread run exclusivity,
//! action-position uniqueness, document dedup, duplicate project names) is
//! enforced by the backing store, because callers are assumed to be
//! distributed across processes. The [`Backend`] trait makes that explicit:
//! **each method executes as one short transaction** (or an equivalently
//! atomic step), and nothing above it holds locks across calls.
//!
//! Two implementations ship:
//! - [`PostgresBackend`]: sqlx/PostgreSQL with real transactions, unique
//!   constraints, conditional updates, and SKIP LOCKED dequeues.
//! - [`MemoryBackend`]: a single-mutex state machine with the same per-call
//!   atomicity, used by tests and local simulation.

mod memory;
mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

use async_trait::async_trait;
use uuid::Uuid;

use crate::chain::{ActionId, ActionRecord, NewAction};
use crate::content::{DocHash, DocumentRecord, NewDocument};
use crate::error::Result;
use crate::events::{EventFilter, NewEvent, StaffXEvent};
use crate::graph::{
    ArtifactId, ArtifactRecord, ConcernRecord, EdgeRecord, GraphWrite, MatrixRefRecord,
    NodeRecord, SystemId, SystemRecord,
};
use crate::rbac::MemberRole;
use crate::runs::{ClaimOutcome, FinalizeRun, FinalizedRun, NewRun, RunId, RunRecord};
use crate::threads::{
    NewProject, NewThread, ProjectId, ProjectRecord, ThreadId, ThreadPatch, ThreadRecord,
};

/// The persistence contract of the core.
///
/// Implementations must guarantee, per method: atomicity (all-or-nothing
/// visibility), and for the conditional transitions (`claim_*`,
/// `finalize_run`, `cancel_run`) that losing the race surfaces as a Conflict
/// error rather than a torn or duplicated write.
#[async_trait]
pub trait Backend: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update an org membership.
    async fn upsert_member(&self, org_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<()>;

    /// Resolve a user's role inside an org; None when not a member.
    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Projects & Threads
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a project; duplicate `(org, name)` is a Conflict.
    async fn create_project(&self, new: NewProject) -> Result<ProjectRecord>;

    async fn list_projects(&self, org_id: Uuid) -> Result<Vec<ProjectRecord>>;

    /// Insert a thread, creating its seed system in the same transaction
    /// when none is supplied.
    async fn create_thread(&self, new: NewThread) -> Result<ThreadRecord>;

    async fn get_thread(&self, id: ThreadId) -> Result<Option<ThreadRecord>>;

    async fn list_threads(&self, project_id: ProjectId) -> Result<Vec<ThreadRecord>>;

    /// Apply a partial update; NotFound when the thread is absent.
    async fn update_thread(&self, id: ThreadId, patch: ThreadPatch) -> Result<ThreadRecord>;

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a document, deduplicating on content address; returns the
    /// stored row either way.
    async fn put_document(&self, new: NewDocument) -> Result<DocumentRecord>;

    async fn get_document(&self, hash: &DocHash) -> Result<Option<DocumentRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Action Chain
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve the thread's current system: the newest action with a usable
    /// fork, else the seed system.
    async fn current_system(&self, thread_id: ThreadId) -> Result<SystemId>;

    /// Allocate the next position, insert the action, and fork the current
    /// system copy-on-write under a fresh id, in one transaction.
    async fn begin_action(&self, thread_id: ThreadId, new: NewAction) -> Result<ActionRecord>;

    /// Flag a forking action as empty so resolution skips it. The position
    /// slot stays consumed and the forked system stays addressable.
    async fn mark_action_empty(
        &self,
        thread_id: ThreadId,
        action_id: ActionId,
    ) -> Result<ActionRecord>;

    /// Insert a non-forking action with its message rows, in one transaction.
    async fn append_action(
        &self,
        thread_id: ThreadId,
        new: NewAction,
        messages: Vec<String>,
    ) -> Result<ActionRecord>;

    async fn get_action(&self, action_id: ActionId) -> Result<Option<ActionRecord>>;

    /// List a thread's actions in position order.
    async fn list_actions(&self, thread_id: ThreadId) -> Result<Vec<ActionRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Graph
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_system(&self, id: SystemId) -> Result<Option<SystemRecord>>;

    /// Apply a batch of writes to one system in one transaction, returning
    /// how many rows actually changed. Referential failures roll the whole
    /// batch back.
    async fn apply_graph_writes(
        &self,
        system_id: SystemId,
        writes: Vec<GraphWrite>,
    ) -> Result<usize>;

    async fn list_nodes(&self, system_id: SystemId) -> Result<Vec<NodeRecord>>;

    async fn list_edges(&self, system_id: SystemId) -> Result<Vec<EdgeRecord>>;

    async fn list_concerns(&self, system_id: SystemId) -> Result<Vec<ConcernRecord>>;

    async fn list_matrix_refs(&self, system_id: SystemId) -> Result<Vec<MatrixRefRecord>>;

    async fn get_artifact(
        &self,
        system_id: SystemId,
        id: ArtifactId,
    ) -> Result<Option<ArtifactRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Run Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a run in `queued`; resolves and denormalizes the thread's org.
    async fn insert_run(&self, new: NewRun) -> Result<RunRecord>;

    async fn get_run(&self, id: RunId) -> Result<Option<RunRecord>>;

    /// Claim the oldest queued run whose thread has no running run, skipping
    /// rows concurrently held by other claimers. None when nothing is
    /// eligible. Per-thread exclusivity is enforced here, at claim time.
    async fn claim_queued_run(&self, runner_id: &str) -> Result<Option<RunRecord>>;

    /// Claim one specific run with the same exclusivity guarantee.
    /// Running under the same runner is an idempotent re-claim; running
    /// under another runner or terminal is a Conflict.
    async fn claim_run(&self, id: RunId, runner_id: &str) -> Result<ClaimOutcome>;

    /// Conditionally finalize a run (from queued/running only) and append
    /// its ExecuteResponse action in one transaction. Terminal is a Conflict.
    async fn finalize_run(&self, id: RunId, finalize: FinalizeRun) -> Result<FinalizedRun>;

    /// Conditionally cancel a run (from queued/running only), recording a
    /// synthetic error. Terminal is a Conflict.
    async fn cancel_run(&self, id: RunId, error: &str) -> Result<RunRecord>;

    // ─────────────────────────────────────────────────────────────────────────
    // Event Log
    // ─────────────────────────────────────────────────────────────────────────

    /// Append one immutable event with a server-assigned id and timestamp.
    async fn append_event(&self, new: NewEvent) -> Result<StaffXEvent>;

    /// Fetch events matching the filter, ordered `(occurred_at, id)`
    /// ascending, up to `filter.limit` rows.
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<StaffXEvent>>;
}
