//! PostgreSQL backend.
//!
//! Uses sqlx with short transactions per trait method. The invariants lean
//! on the database, not on process state:
//!
//! - per-thread action positions: thread-row `FOR UPDATE` + a unique
//!   `(thread_id, position)` constraint
//! - queue dequeue: `FOR UPDATE SKIP LOCKED` candidate scan, per-thread
//!   exclusivity re-checked under the thread-row lock
//! - run transitions: conditional `UPDATE ... WHERE status IN (...)`;
//!   a missed match is the Conflict signal
//! - document dedup / project names: `ON CONFLICT` on unique keys
//! - copy-on-write forks: `INSERT ... SELECT` row copies under a fresh
//!   system id, inside the same transaction as the action insert

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{QueryBuilder, Row};
use uuid::Uuid;

use crate::chain::{ActionId, ActionRecord, ActionType, NewAction};
use crate::config::DatabaseConfig;
use crate::content::{DocHash, DocumentKind, DocumentRecord, NewDocument};
use crate::error::{ErrorCode, Result, StaffError};
use crate::events::{EventFilter, EventPosition, EventType, NewEvent, StaffXEvent};
use crate::graph::{
    with_layout, ArtifactId, ArtifactRecord, ConcernId, ConcernRecord, EdgeId, EdgeKind,
    EdgeRecord, GraphWrite, MatrixRefKind, MatrixRefRecord, NodeId, NodeKind, NodeRecord,
    SystemId, SystemRecord,
};
use crate::rbac::MemberRole;
use crate::runs::{
    ClaimOutcome, FinalizeRun, FinalizedRun, NewRun, RunId, RunMode, RunRecord, RunStatus,
};
use crate::threads::{
    NewProject, NewThread, ProjectId, ProjectRecord, ThreadId, ThreadPatch, ThreadRecord,
    ThreadStatus,
};

use super::Backend;

/// How many times the queue dequeue retries after losing a per-thread race.
const CLAIM_ATTEMPTS: usize = 8;

/// PostgreSQL-backed [`Backend`] implementation.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect a pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                StaffError::with_internal(
                    ErrorCode::DatabaseError,
                    "Failed to run migrations",
                    e.to_string(),
                )
            })?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for ProjectRecord {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: ProjectId(row.id),
            org_id: row.org_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ThreadRow {
    id: Uuid,
    project_id: Uuid,
    org_id: Uuid,
    title: String,
    status: String,
    seed_system_id: Uuid,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ThreadRow> for ThreadRecord {
    type Error = StaffError;

    fn try_from(row: ThreadRow) -> Result<Self> {
        Ok(Self {
            id: ThreadId(row.id),
            project_id: ProjectId(row.project_id),
            org_id: row.org_id,
            title: row.title,
            status: ThreadStatus::parse(&row.status)
                .ok_or_else(|| invalid_stored("thread status", &row.status))?,
            seed_system_id: SystemId(row.seed_system_id),
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    hash: String,
    kind: String,
    title: String,
    language: Option<String>,
    body: String,
    supersedes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for DocumentRecord {
    type Error = StaffError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        Ok(Self {
            hash: DocHash(row.hash),
            kind: DocumentKind::parse(&row.kind)
                .ok_or_else(|| invalid_stored("document kind", &row.kind))?,
            title: row.title,
            language: row.language,
            body: row.body,
            supersedes: row.supersedes.map(DocHash),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActionRow {
    id: Uuid,
    thread_id: Uuid,
    position: i64,
    action_type: String,
    title: Option<String>,
    output_system_id: Option<Uuid>,
    empty: bool,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl ActionRow {
    fn into_record(self, messages: Vec<String>) -> Result<ActionRecord> {
        Ok(ActionRecord {
            id: ActionId(self.id),
            thread_id: ThreadId(self.thread_id),
            position: self.position,
            action_type: ActionType::parse(&self.action_type)
                .ok_or_else(|| invalid_stored("action type", &self.action_type))?,
            title: self.title,
            output_system_id: self.output_system_id.map(SystemId),
            empty: self.empty,
            messages,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    thread_id: Uuid,
    org_id: Uuid,
    mode: String,
    model: Option<String>,
    prompt: String,
    status: String,
    runner_id: Option<String>,
    chat_message_id: Option<Uuid>,
    result_messages: serde_json::Value,
    result_changes: serde_json::Value,
    run_error: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = StaffError;

    fn try_from(row: RunRow) -> Result<Self> {
        Ok(Self {
            id: RunId(row.id),
            thread_id: ThreadId(row.thread_id),
            org_id: row.org_id,
            mode: RunMode::parse(&row.mode)
                .ok_or_else(|| invalid_stored("run mode", &row.mode))?,
            model: row.model,
            prompt: row.prompt,
            status: RunStatus::parse(&row.status)
                .ok_or_else(|| invalid_stored("run status", &row.status))?,
            runner_id: row.runner_id,
            chat_message_id: row.chat_message_id.map(ActionId),
            result_messages: serde_json::from_value(row.result_messages)?,
            result_changes: row.result_changes,
            run_error: row.run_error,
            created_by: row.created_by,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    event_type: String,
    aggregate_type: String,
    aggregate_id: Uuid,
    org_id: Uuid,
    trace_id: Option<String>,
    payload: serde_json::Value,
    version: i32,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StaffXEvent {
    type Error = StaffError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            event_type: EventType::parse(&row.event_type)
                .ok_or_else(|| invalid_stored("event type", &row.event_type))?,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            org_id: row.org_id,
            trace_id: row.trace_id,
            payload: row.payload,
            version: row.version,
            occurred_at: row.occurred_at,
        })
    }
}

fn invalid_stored(what: &str, value: &str) -> StaffError {
    StaffError::internal(format!("invalid {} stored: {}", what, value))
}

const RUN_COLUMNS: &str = "id, thread_id, org_id, mode, model, prompt, status, runner_id, \
     chat_message_id, result_messages, result_changes, run_error, created_by, created_at, \
     started_at, finished_at";

const ACTION_COLUMNS: &str =
    "id, thread_id, position, action_type, title, output_system_id, empty, created_by, created_at";

// ═══════════════════════════════════════════════════════════════════════════════
// Backend implementation
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl Backend for PostgresBackend {
    // ── Membership ──────────────────────────────────────────────────────────

    async fn upsert_member(&self, org_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO org_members (org_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (org_id, user_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM org_members WHERE org_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        role.map(|r| MemberRole::parse(&r).ok_or_else(|| invalid_stored("member role", &r)))
            .transpose()
    }

    // ── Projects & Threads ──────────────────────────────────────────────────

    async fn create_project(&self, new: NewProject) -> Result<ProjectRecord> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (id, org_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (org_id, name) DO NOTHING
            RETURNING id, org_id, name, created_at
            "#,
        )
        .bind(new.id.0)
        .bind(new.org_id)
        .bind(&new.name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(StaffError::conflict(
                ErrorCode::DuplicateProjectName,
                format!("Project name already in use: {}", new.name),
            )),
        }
    }

    async fn list_projects(&self, org_id: Uuid) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, org_id, name, created_at FROM projects WHERE org_id = $1 ORDER BY name",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_thread(&self, new: NewThread) -> Result<ThreadRecord> {
        let mut tx = self.pool.begin().await?;

        let project_org: Option<Uuid> =
            sqlx::query_scalar("SELECT org_id FROM projects WHERE id = $1")
                .bind(new.project_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let project_org = project_org
            .ok_or_else(|| StaffError::not_found("project", new.project_id.to_string()))?;
        if project_org != new.org_id {
            return Err(StaffError::forbidden("Project belongs to another org"));
        }

        let seed = match new.seed_system_id {
            Some(seed) => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM systems WHERE id = $1)")
                        .bind(seed.0)
                        .fetch_one(&mut *tx)
                        .await?;
                if !exists {
                    return Err(StaffError::not_found("system", seed.to_string()));
                }
                seed
            }
            None => {
                let seed = SystemId::new();
                sqlx::query("INSERT INTO systems (id, forked_from) VALUES ($1, NULL)")
                    .bind(seed.0)
                    .execute(&mut *tx)
                    .await?;
                seed
            }
        };

        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            INSERT INTO threads (id, project_id, org_id, title, status, seed_system_id, created_by)
            VALUES ($1, $2, $3, $4, 'open', $5, $6)
            RETURNING id, project_id, org_id, title, status, seed_system_id, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(new.id.0)
        .bind(new.project_id.0)
        .bind(new.org_id)
        .bind(&new.title)
        .bind(seed.0)
        .bind(&new.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_thread(&self, id: ThreadId) -> Result<Option<ThreadRecord>> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            SELECT id, project_id, org_id, title, status, seed_system_id, created_by,
                   created_at, updated_at
            FROM threads
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_threads(&self, project_id: ProjectId) -> Result<Vec<ThreadRecord>> {
        let rows = sqlx::query_as::<_, ThreadRow>(
            r#"
            SELECT id, project_id, org_id, title, status, seed_system_id, created_by,
                   created_at, updated_at
            FROM threads
            WHERE project_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_thread(&self, id: ThreadId, patch: ThreadPatch) -> Result<ThreadRecord> {
        let row = sqlx::query_as::<_, ThreadRow>(
            r#"
            UPDATE threads
            SET title = COALESCE($2, title),
                status = COALESCE($3, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, project_id, org_id, title, status, seed_system_id, created_by,
                      created_at, updated_at
            "#,
        )
        .bind(id.0)
        .bind(patch.title)
        .bind(patch.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StaffError::not_found("thread", id.to_string()))?
            .try_into()
    }

    // ── Documents ───────────────────────────────────────────────────────────

    async fn put_document(&self, new: NewDocument) -> Result<DocumentRecord> {
        let hash = new.hash();

        sqlx::query(
            r#"
            INSERT INTO documents (hash, kind, title, language, body, supersedes)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (hash) DO NOTHING
            "#,
        )
        .bind(hash.as_str())
        .bind(new.kind.as_str())
        .bind(&new.title)
        .bind(&new.language)
        .bind(&new.body)
        .bind(new.supersedes.as_ref().map(|h| h.as_str().to_owned()))
        .execute(&self.pool)
        .await?;

        self.get_document(&hash)
            .await?
            .ok_or_else(|| StaffError::internal("document vanished after dedup insert"))
    }

    async fn get_document(&self, hash: &DocHash) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT hash, kind, title, language, body, supersedes, created_at
            FROM documents
            WHERE hash = $1
            "#,
        )
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    // ── Action Chain ────────────────────────────────────────────────────────

    async fn current_system(&self, thread_id: ThreadId) -> Result<SystemId> {
        let seed: Option<Uuid> =
            sqlx::query_scalar("SELECT seed_system_id FROM threads WHERE id = $1")
                .bind(thread_id.0)
                .fetch_optional(&self.pool)
                .await?;
        let seed =
            seed.ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;

        let latest: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT output_system_id
            FROM thread_actions
            WHERE thread_id = $1 AND output_system_id IS NOT NULL AND NOT empty
            ORDER BY position DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(SystemId(latest.unwrap_or(seed)))
    }

    async fn begin_action(&self, thread_id: ThreadId, new: NewAction) -> Result<ActionRecord> {
        let mut tx = self.pool.begin().await?;

        // The thread-row lock serializes position allocation and fork
        // resolution for this thread.
        let seed: Option<Uuid> =
            sqlx::query_scalar("SELECT seed_system_id FROM threads WHERE id = $1 FOR UPDATE")
                .bind(thread_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let seed =
            seed.ok_or_else(|| StaffError::not_found("thread", thread_id.to_string()))?;

        let latest: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT output_system_id
            FROM thread_actions
            WHERE thread_id = $1 AND output_system_id IS NOT NULL AND NOT empty
            ORDER BY position DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let current = latest.unwrap_or(seed);

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM thread_actions WHERE thread_id = $1",
        )
        .bind(thread_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let fork = SystemId::new();
        sqlx::query("INSERT INTO systems (id, forked_from) VALUES ($1, $2)")
            .bind(fork.0)
            .bind(current)
            .execute(&mut *tx)
            .await?;

        // Copy-on-write as a full structural row copy under the new id.
        for copy in [
            "INSERT INTO system_nodes (system_id, id, kind, name, parent_id, metadata)
             SELECT $1, id, kind, name, parent_id, metadata FROM system_nodes WHERE system_id = $2",
            "INSERT INTO system_edges (system_id, id, kind, from_node, to_node, metadata)
             SELECT $1, id, kind, from_node, to_node, metadata FROM system_edges WHERE system_id = $2",
            "INSERT INTO system_concerns (system_id, id, name, position)
             SELECT $1, id, name, position FROM system_concerns WHERE system_id = $2",
            "INSERT INTO system_matrix_refs (system_id, node_id, concern_id, ref_kind, doc_hash)
             SELECT $1, node_id, concern_id, ref_kind, doc_hash FROM system_matrix_refs WHERE system_id = $2",
            "INSERT INTO system_artifacts (system_id, id, node_id, concern_id, artifact_type, language, content, updated_at)
             SELECT $1, id, node_id, concern_id, artifact_type, language, content, updated_at FROM system_artifacts WHERE system_id = $2",
        ] {
            sqlx::query(copy)
                .bind(fork.0)
                .bind(current)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query_as::<_, ActionRow>(&format!(
            r#"
            INSERT INTO thread_actions (id, thread_id, position, action_type, title, output_system_id, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ACTION_COLUMNS}
            "#
        ))
        .bind(new.id.0)
        .bind(thread_id.0)
        .bind(position)
        .bind(new.action_type.as_str())
        .bind(&new.title)
        .bind(fork.0)
        .bind(&new.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_record(vec![])
    }

    async fn mark_action_empty(
        &self,
        thread_id: ThreadId,
        action_id: ActionId,
    ) -> Result<ActionRecord> {
        let row = sqlx::query_as::<_, ActionRow>(&format!(
            r#"
            UPDATE thread_actions
            SET empty = TRUE
            WHERE thread_id = $1 AND id = $2
            RETURNING {ACTION_COLUMNS}
            "#
        ))
        .bind(thread_id.0)
        .bind(action_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| StaffError::not_found("action", action_id.to_string()))?;
        let messages = self.action_messages(action_id).await?;
        row.into_record(messages)
    }

    async fn append_action(
        &self,
        thread_id: ThreadId,
        new: NewAction,
        messages: Vec<String>,
    ) -> Result<ActionRecord> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM threads WHERE id = $1 FOR UPDATE")
                .bind(thread_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(StaffError::not_found("thread", thread_id.to_string()));
        }

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM thread_actions WHERE thread_id = $1",
        )
        .bind(thread_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, ActionRow>(&format!(
            r#"
            INSERT INTO thread_actions (id, thread_id, position, action_type, title, output_system_id, created_by)
            VALUES ($1, $2, $3, $4, $5, NULL, $6)
            RETURNING {ACTION_COLUMNS}
            "#
        ))
        .bind(new.id.0)
        .bind(thread_id.0)
        .bind(position)
        .bind(new.action_type.as_str())
        .bind(&new.title)
        .bind(&new.created_by)
        .fetch_one(&mut *tx)
        .await?;

        for (idx, body) in messages.iter().enumerate() {
            sqlx::query("INSERT INTO action_messages (action_id, idx, body) VALUES ($1, $2, $3)")
                .bind(new.id.0)
                .bind(idx as i32)
                .bind(body)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        row.into_record(messages)
    }

    async fn get_action(&self, action_id: ActionId) -> Result<Option<ActionRecord>> {
        let row = sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {ACTION_COLUMNS} FROM thread_actions WHERE id = $1"
        ))
        .bind(action_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let messages = self.action_messages(action_id).await?;
                Ok(Some(row.into_record(messages)?))
            }
            None => Ok(None),
        }
    }

    async fn list_actions(&self, thread_id: ThreadId) -> Result<Vec<ActionRecord>> {
        let rows = sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {ACTION_COLUMNS} FROM thread_actions WHERE thread_id = $1 ORDER BY position"
        ))
        .bind(thread_id.0)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let message_rows = sqlx::query(
            r#"
            SELECT action_id, body
            FROM action_messages
            WHERE action_id = ANY($1)
            ORDER BY action_id, idx
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: std::collections::HashMap<Uuid, Vec<String>> = Default::default();
        for row in message_rows {
            let action_id: Uuid = row.try_get("action_id")?;
            let body: String = row.try_get("body")?;
            messages.entry(action_id).or_default().push(body);
        }

        rows.into_iter()
            .map(|row| {
                let msgs = messages.remove(&row.id).unwrap_or_default();
                row.into_record(msgs)
            })
            .collect()
    }

    // ── Graph ───────────────────────────────────────────────────────────────

    async fn get_system(&self, id: SystemId) -> Result<Option<SystemRecord>> {
        let row = sqlx::query("SELECT id, forked_from, created_at FROM systems WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| SystemRecord {
            id: SystemId(row.get("id")),
            forked_from: row.get::<Option<Uuid>, _>("forked_from").map(SystemId),
            created_at: row.get("created_at"),
        }))
    }

    async fn apply_graph_writes(
        &self,
        system_id: SystemId,
        writes: Vec<GraphWrite>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM systems WHERE id = $1)")
            .bind(system_id.0)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(StaffError::not_found("system", system_id.to_string()));
        }

        let mut changed = 0usize;
        for write in writes {
            changed += apply_write_pg(&mut tx, system_id, write).await?;
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn list_nodes(&self, system_id: SystemId) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT system_id, id, kind, name, parent_id, metadata
            FROM system_nodes
            WHERE system_id = $1
            ORDER BY id
            "#,
        )
        .bind(system_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                Ok(NodeRecord {
                    system_id: SystemId(row.try_get("system_id")?),
                    id: NodeId(row.try_get("id")?),
                    kind: NodeKind::parse(&kind)
                        .ok_or_else(|| invalid_stored("node kind", &kind))?,
                    name: row.try_get("name")?,
                    parent: row.try_get::<Option<Uuid>, _>("parent_id")?.map(NodeId),
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect()
    }

    async fn list_edges(&self, system_id: SystemId) -> Result<Vec<EdgeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT system_id, id, kind, from_node, to_node, metadata
            FROM system_edges
            WHERE system_id = $1
            ORDER BY id
            "#,
        )
        .bind(system_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                Ok(EdgeRecord {
                    system_id: SystemId(row.try_get("system_id")?),
                    id: EdgeId(row.try_get("id")?),
                    kind: EdgeKind::parse(&kind)
                        .ok_or_else(|| invalid_stored("edge kind", &kind))?,
                    from: NodeId(row.try_get("from_node")?),
                    to: NodeId(row.try_get("to_node")?),
                    metadata: row.try_get("metadata")?,
                })
            })
            .collect()
    }

    async fn list_concerns(&self, system_id: SystemId) -> Result<Vec<ConcernRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT system_id, id, name, position
            FROM system_concerns
            WHERE system_id = $1
            ORDER BY position
            "#,
        )
        .bind(system_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ConcernRecord {
                    system_id: SystemId(row.try_get("system_id")?),
                    id: ConcernId(row.try_get("id")?),
                    name: row.try_get("name")?,
                    position: row.try_get("position")?,
                })
            })
            .collect()
    }

    async fn list_matrix_refs(&self, system_id: SystemId) -> Result<Vec<MatrixRefRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT system_id, node_id, concern_id, ref_kind, doc_hash
            FROM system_matrix_refs
            WHERE system_id = $1
            ORDER BY node_id, concern_id, ref_kind, doc_hash
            "#,
        )
        .bind(system_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let ref_kind: String = row.try_get("ref_kind")?;
                Ok(MatrixRefRecord {
                    system_id: SystemId(row.try_get("system_id")?),
                    node_id: NodeId(row.try_get("node_id")?),
                    concern_id: ConcernId(row.try_get("concern_id")?),
                    ref_kind: MatrixRefKind::parse(&ref_kind)
                        .ok_or_else(|| invalid_stored("matrix ref kind", &ref_kind))?,
                    doc_hash: DocHash(row.try_get("doc_hash")?),
                })
            })
            .collect()
    }

    async fn get_artifact(
        &self,
        system_id: SystemId,
        id: ArtifactId,
    ) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query(
            r#"
            SELECT system_id, id, node_id, concern_id, artifact_type, language, content, updated_at
            FROM system_artifacts
            WHERE system_id = $1 AND id = $2
            "#,
        )
        .bind(system_id.0)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ArtifactRecord {
                system_id: SystemId(row.try_get("system_id")?),
                id: ArtifactId(row.try_get("id")?),
                node_id: NodeId(row.try_get("node_id")?),
                concern_id: ConcernId(row.try_get("concern_id")?),
                artifact_type: row.try_get("artifact_type")?,
                language: row.try_get("language")?,
                content: row.try_get("content")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    // ── Run Queue ───────────────────────────────────────────────────────────

    async fn insert_run(&self, new: NewRun) -> Result<RunRecord> {
        let org_id: Option<Uuid> = sqlx::query_scalar("SELECT org_id FROM threads WHERE id = $1")
            .bind(new.thread_id.0)
            .fetch_optional(&self.pool)
            .await?;
        let org_id =
            org_id.ok_or_else(|| StaffError::not_found("thread", new.thread_id.to_string()))?;

        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO agent_runs (id, thread_id, org_id, mode, model, prompt, status, chat_message_id, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, 'queued', $7, $8)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(new.id.0)
        .bind(new.thread_id.0)
        .bind(org_id)
        .bind(new.mode.as_str())
        .bind(&new.model)
        .bind(&new.prompt)
        .bind(new.chat_message_id.map(|a| a.0))
        .bind(&new.created_by)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_run(&self, id: RunId) -> Result<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn claim_queued_run(&self, runner_id: &str) -> Result<Option<RunRecord>> {
        // Each attempt is its own short transaction: pick the oldest queued
        // run whose thread looks idle (skipping rows other claimers hold),
        // then re-check exclusivity under the thread-row lock. Losing that
        // re-check means another claimer won the thread; the next attempt's
        // candidate scan no longer sees this thread as idle.
        for _ in 0..CLAIM_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            let candidate: Option<(Uuid, Uuid)> = sqlx::query_as(
                r#"
                SELECT r.id, r.thread_id
                FROM agent_runs r
                WHERE r.status = 'queued'
                  AND NOT EXISTS (
                      SELECT 1 FROM agent_runs x
                      WHERE x.thread_id = r.thread_id AND x.status = 'running'
                  )
                ORDER BY r.created_at, r.id
                LIMIT 1
                FOR UPDATE OF r SKIP LOCKED
                "#,
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some((run_id, thread_id)) = candidate else {
                return Ok(None);
            };

            sqlx::query("SELECT id FROM threads WHERE id = $1 FOR UPDATE")
                .bind(thread_id)
                .execute(&mut *tx)
                .await?;

            let busy: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM agent_runs WHERE thread_id = $1 AND status = 'running')",
            )
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .await?;

            if busy {
                tx.commit().await?;
                continue;
            }

            let row = sqlx::query_as::<_, RunRow>(&format!(
                r#"
                UPDATE agent_runs
                SET status = 'running', runner_id = $2, started_at = NOW()
                WHERE id = $1 AND status = 'queued'
                RETURNING {RUN_COLUMNS}
                "#
            ))
            .bind(run_id)
            .bind(runner_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(Some(row.try_into()?));
        }

        Ok(None)
    }

    async fn claim_run(&self, id: RunId, runner_id: &str) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let run: RunRecord = row
            .ok_or_else(|| StaffError::not_found("run", id.to_string()))?
            .try_into()?;

        match run.status {
            RunStatus::Queued => {
                sqlx::query("SELECT id FROM threads WHERE id = $1 FOR UPDATE")
                    .bind(run.thread_id.0)
                    .execute(&mut *tx)
                    .await?;

                let busy: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM agent_runs
                        WHERE thread_id = $1 AND status = 'running' AND id <> $2
                    )
                    "#,
                )
                .bind(run.thread_id.0)
                .bind(id.0)
                .fetch_one(&mut *tx)
                .await?;
                if busy {
                    return Err(StaffError::conflict(
                        ErrorCode::RunClaimConflict,
                        "Another run is already running for this thread",
                    ));
                }

                let row = sqlx::query_as::<_, RunRow>(&format!(
                    r#"
                    UPDATE agent_runs
                    SET status = 'running', runner_id = $2, started_at = NOW()
                    WHERE id = $1 AND status = 'queued'
                    RETURNING {RUN_COLUMNS}
                    "#
                ))
                .bind(id.0)
                .bind(runner_id)
                .fetch_one(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(ClaimOutcome::Claimed(row.try_into()?))
            }
            RunStatus::Running => {
                tx.commit().await?;
                if run.runner_id.as_deref() == Some(runner_id) {
                    Ok(ClaimOutcome::AlreadyOwned(run))
                } else {
                    Err(StaffError::conflict(
                        ErrorCode::RunClaimConflict,
                        "Run is already claimed by another runner",
                    ))
                }
            }
            _ => {
                tx.commit().await?;
                Err(StaffError::conflict(
                    ErrorCode::RunAlreadyFinalized,
                    format!("Run is already {}", run.status),
                ))
            }
        }
    }

    async fn finalize_run(&self, id: RunId, finalize: FinalizeRun) -> Result<FinalizedRun> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            UPDATE agent_runs
            SET status = $2,
                result_messages = $3,
                result_changes = $4,
                run_error = $5,
                finished_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'running')
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(finalize.status.as_str())
        .bind(serde_json::to_value(&finalize.messages)?)
        .bind(&finalize.changes)
        .bind(&finalize.error)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Losing the conditional update is the sole Conflict signal.
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM agent_runs WHERE id = $1")
                    .bind(id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match status {
                None => StaffError::not_found("run", id.to_string()),
                Some(status) => StaffError::conflict(
                    ErrorCode::RunAlreadyFinalized,
                    format!("Run is already {}", status),
                ),
            });
        };
        let run: RunRecord = row.try_into()?;

        sqlx::query("SELECT id FROM threads WHERE id = $1 FOR UPDATE")
            .bind(run.thread_id.0)
            .execute(&mut *tx)
            .await?;

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM thread_actions WHERE thread_id = $1",
        )
        .bind(run.thread_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let responder = run
            .runner_id
            .clone()
            .unwrap_or_else(|| "assistant".to_owned());
        let action_row = sqlx::query_as::<_, ActionRow>(&format!(
            r#"
            INSERT INTO thread_actions (id, thread_id, position, action_type, title, output_system_id, created_by)
            VALUES ($1, $2, $3, 'execute_response', NULL, NULL, $4)
            RETURNING {ACTION_COLUMNS}
            "#
        ))
        .bind(finalize.response_action_id.0)
        .bind(run.thread_id.0)
        .bind(position)
        .bind(&responder)
        .fetch_one(&mut *tx)
        .await?;

        for (idx, body) in finalize.messages.iter().enumerate() {
            sqlx::query("INSERT INTO action_messages (action_id, idx, body) VALUES ($1, $2, $3)")
                .bind(finalize.response_action_id.0)
                .bind(idx as i32)
                .bind(body)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(FinalizedRun {
            run,
            action: action_row.into_record(finalize.messages)?,
        })
    }

    async fn cancel_run(&self, id: RunId, error: &str) -> Result<RunRecord> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            UPDATE agent_runs
            SET status = 'cancelled', run_error = $2, finished_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'running')
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM agent_runs WHERE id = $1")
                        .bind(id.0)
                        .fetch_optional(&self.pool)
                        .await?;
                Err(match status {
                    None => StaffError::not_found("run", id.to_string()),
                    Some(status) => StaffError::conflict(
                        ErrorCode::RunAlreadyFinalized,
                        format!("Run is already {}", status),
                    ),
                })
            }
        }
    }

    // ── Event Log ───────────────────────────────────────────────────────────

    async fn append_event(&self, new: NewEvent) -> Result<StaffXEvent> {
        let row = sqlx::query(
            r#"
            INSERT INTO events (event_type, aggregate_type, aggregate_id, org_id, trace_id, payload, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, occurred_at
            "#,
        )
        .bind(new.event_type.as_str())
        .bind(&new.aggregate_type)
        .bind(new.aggregate_id)
        .bind(new.org_id)
        .bind(&new.trace_id)
        .bind(&new.payload)
        .bind(new.version)
        .fetch_one(&self.pool)
        .await?;

        Ok(StaffXEvent {
            id: row.try_get("id")?,
            event_type: new.event_type,
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            org_id: new.org_id,
            trace_id: new.trace_id,
            payload: new.payload,
            version: new.version,
            occurred_at: row.try_get("occurred_at")?,
        })
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<StaffXEvent>> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT id, event_type, aggregate_type, aggregate_id, org_id, trace_id, payload, \
             version, occurred_at FROM events WHERE 1=1",
        );

        if let Some(org_id) = filter.org_id {
            qb.push(" AND org_id = ").push_bind(org_id);
        }
        if let Some(aggregate_type) = &filter.aggregate_type {
            qb.push(" AND aggregate_type = ").push_bind(aggregate_type);
        }
        if let Some(aggregate_id) = filter.aggregate_id {
            qb.push(" AND aggregate_id = ").push_bind(aggregate_id);
        }
        match filter.since {
            Some(EventPosition::Cursor { occurred_at, id }) => {
                qb.push(" AND (occurred_at, id) > (")
                    .push_bind(occurred_at)
                    .push(", ")
                    .push_bind(id)
                    .push(")");
            }
            Some(EventPosition::Timestamp(ts)) => {
                qb.push(" AND occurred_at > ").push_bind(ts);
            }
            None => {}
        }
        qb.push(" ORDER BY occurred_at ASC, id ASC LIMIT ")
            .push_bind(filter.limit);

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Graph write application
// ═══════════════════════════════════════════════════════════════════════════════

async fn node_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    system_id: SystemId,
    node_id: NodeId,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM system_nodes WHERE system_id = $1 AND id = $2)",
    )
    .bind(system_id.0)
    .bind(node_id.0)
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

async fn concern_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    system_id: SystemId,
    concern_id: ConcernId,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM system_concerns WHERE system_id = $1 AND id = $2)",
    )
    .bind(system_id.0)
    .bind(concern_id.0)
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

/// Apply one write inside the batch transaction; returns 1 if a row changed.
async fn apply_write_pg(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
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
                if !node_exists(tx, system_id, parent).await? {
                    return Err(StaffError::not_found("node", parent.to_string()));
                }
            }
            let result = sqlx::query(
                r#"
                INSERT INTO system_nodes (system_id, id, kind, name, parent_id, metadata)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (system_id, id) DO UPDATE
                SET kind = EXCLUDED.kind, name = EXCLUDED.name,
                    parent_id = EXCLUDED.parent_id, metadata = EXCLUDED.metadata
                WHERE (system_nodes.kind, system_nodes.name, system_nodes.parent_id, system_nodes.metadata)
                      IS DISTINCT FROM
                      (EXCLUDED.kind, EXCLUDED.name, EXCLUDED.parent_id, EXCLUDED.metadata)
                "#,
            )
            .bind(system_id.0)
            .bind(id.0)
            .bind(kind.as_str())
            .bind(&name)
            .bind(parent.map(|p| p.0))
            .bind(&metadata)
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() as usize)
        }

        GraphWrite::UpsertEdge {
            id,
            kind,
            from,
            to,
            metadata,
        } => {
            for node in [from, to] {
                if !node_exists(tx, system_id, node).await? {
                    return Err(StaffError::not_found("node", node.to_string()));
                }
            }
            let result = sqlx::query(
                r#"
                INSERT INTO system_edges (system_id, id, kind, from_node, to_node, metadata)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (system_id, id) DO UPDATE
                SET kind = EXCLUDED.kind, from_node = EXCLUDED.from_node,
                    to_node = EXCLUDED.to_node, metadata = EXCLUDED.metadata
                WHERE (system_edges.kind, system_edges.from_node, system_edges.to_node, system_edges.metadata)
                      IS DISTINCT FROM
                      (EXCLUDED.kind, EXCLUDED.from_node, EXCLUDED.to_node, EXCLUDED.metadata)
                "#,
            )
            .bind(system_id.0)
            .bind(id.0)
            .bind(kind.as_str())
            .bind(from.0)
            .bind(to.0)
            .bind(&metadata)
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() as usize)
        }

        GraphWrite::UpsertConcern { id, name, position } => {
            let result = sqlx::query(
                r#"
                INSERT INTO system_concerns (system_id, id, name, position)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (system_id, id) DO UPDATE
                SET name = EXCLUDED.name, position = EXCLUDED.position
                WHERE (system_concerns.name, system_concerns.position)
                      IS DISTINCT FROM (EXCLUDED.name, EXCLUDED.position)
                "#,
            )
            .bind(system_id.0)
            .bind(id.0)
            .bind(&name)
            .bind(position)
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() as usize)
        }

        GraphWrite::SetNodeLayout { node_id, x, y } => {
            let metadata: Option<serde_json::Value> = sqlx::query_scalar(
                "SELECT metadata FROM system_nodes WHERE system_id = $1 AND id = $2",
            )
            .bind(system_id.0)
            .bind(node_id.0)
            .fetch_optional(&mut **tx)
            .await?;
            let metadata =
                metadata.ok_or_else(|| StaffError::not_found("node", node_id.to_string()))?;

            let current = metadata
                .get("layout")
                .and_then(|l| Some((l.get("x")?.as_f64()?, l.get("y")?.as_f64()?)));
            if current == Some((x, y)) {
                return Ok(0);
            }

            sqlx::query("UPDATE system_nodes SET metadata = $3 WHERE system_id = $1 AND id = $2")
                .bind(system_id.0)
                .bind(node_id.0)
                .bind(with_layout(&metadata, x, y))
                .execute(&mut **tx)
                .await?;
            Ok(1)
        }

        GraphWrite::AttachMatrixRef {
            node_id,
            concern_id,
            ref_kind,
            doc_hash,
        } => {
            if !node_exists(tx, system_id, node_id).await? {
                return Err(StaffError::not_found("node", node_id.to_string()));
            }
            if !concern_exists(tx, system_id, concern_id).await? {
                return Err(StaffError::not_found("concern", concern_id.to_string()));
            }
            let doc: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM documents WHERE hash = $1)")
                    .bind(doc_hash.as_str())
                    .fetch_one(&mut **tx)
                    .await?;
            if !doc {
                return Err(StaffError::not_found("document", doc_hash.as_str()));
            }

            let result = sqlx::query(
                r#"
                INSERT INTO system_matrix_refs (system_id, node_id, concern_id, ref_kind, doc_hash)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(system_id.0)
            .bind(node_id.0)
            .bind(concern_id.0)
            .bind(ref_kind.as_str())
            .bind(doc_hash.as_str())
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() as usize)
        }

        GraphWrite::DetachMatrixRef {
            node_id,
            concern_id,
            ref_kind,
            doc_hash,
        } => {
            let result = sqlx::query(
                r#"
                DELETE FROM system_matrix_refs
                WHERE system_id = $1 AND node_id = $2 AND concern_id = $3
                  AND ref_kind = $4 AND doc_hash = $5
                "#,
            )
            .bind(system_id.0)
            .bind(node_id.0)
            .bind(concern_id.0)
            .bind(ref_kind.as_str())
            .bind(doc_hash.as_str())
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() as usize)
        }

        GraphWrite::PutArtifact {
            id,
            node_id,
            concern_id,
            artifact_type,
            language,
            content,
        } => {
            if !node_exists(tx, system_id, node_id).await? {
                return Err(StaffError::not_found("node", node_id.to_string()));
            }
            if !concern_exists(tx, system_id, concern_id).await? {
                return Err(StaffError::not_found("concern", concern_id.to_string()));
            }
            let result = sqlx::query(
                r#"
                INSERT INTO system_artifacts (system_id, id, node_id, concern_id, artifact_type, language, content)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (system_id, id) DO UPDATE
                SET node_id = EXCLUDED.node_id, concern_id = EXCLUDED.concern_id,
                    artifact_type = EXCLUDED.artifact_type, language = EXCLUDED.language,
                    content = EXCLUDED.content, updated_at = NOW()
                WHERE (system_artifacts.node_id, system_artifacts.concern_id, system_artifacts.artifact_type,
                       system_artifacts.language, system_artifacts.content)
                      IS DISTINCT FROM
                      (EXCLUDED.node_id, EXCLUDED.concern_id, EXCLUDED.artifact_type,
                       EXCLUDED.language, EXCLUDED.content)
                "#,
            )
            .bind(system_id.0)
            .bind(id.0)
            .bind(node_id.0)
            .bind(concern_id.0)
            .bind(&artifact_type)
            .bind(&language)
            .bind(&content)
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() as usize)
        }
    }
}

impl PostgresBackend {
    async fn action_messages(&self, action_id: ActionId) -> Result<Vec<String>> {
        let messages: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM action_messages WHERE action_id = $1 ORDER BY idx",
        )
        .bind(action_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}
