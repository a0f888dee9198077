//! Graph store service: system-scoped reads and writes.
//!
//! Every write targets an explicit [`SystemId`], normally the fork returned
//! by `ActionChain::begin_action`. The service is a thin validation layer
//! over `Backend::apply_graph_writes`, which applies a batch atomically and
//! reports the number of rows that actually changed.

use std::sync::Arc;
use tracing::instrument;

use crate::content::DocHash;
use crate::error::{Result, StaffError};
use crate::store::Backend;

use super::{
    ArtifactId, ArtifactRecord, ConcernId, ConcernRecord, EdgeId, EdgeKind, EdgeRecord,
    GraphWrite, MatrixRefKind, MatrixRefRecord, NodeId, NodeKind, NodeMove, NodeRecord, SystemId,
    SystemRecord,
};

/// Service facade for the graph store.
#[derive(Clone)]
pub struct GraphStore {
    backend: Arc<dyn Backend>,
}

impl GraphStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update a node. Returns whether a row changed.
    pub async fn upsert_node(
        &self,
        system_id: SystemId,
        id: NodeId,
        kind: NodeKind,
        name: impl Into<String>,
        parent: Option<NodeId>,
        metadata: serde_json::Value,
    ) -> Result<bool> {
        let changed = self
            .backend
            .apply_graph_writes(
                system_id,
                vec![GraphWrite::UpsertNode {
                    id,
                    kind,
                    name: name.into(),
                    parent,
                    metadata,
                }],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Insert or update an edge. Returns whether a row changed.
    pub async fn upsert_edge(
        &self,
        system_id: SystemId,
        id: EdgeId,
        kind: EdgeKind,
        from: NodeId,
        to: NodeId,
        metadata: serde_json::Value,
    ) -> Result<bool> {
        let changed = self
            .backend
            .apply_graph_writes(
                system_id,
                vec![GraphWrite::UpsertEdge {
                    id,
                    kind,
                    from,
                    to,
                    metadata,
                }],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Insert or update a concern. Returns whether a row changed.
    pub async fn upsert_concern(
        &self,
        system_id: SystemId,
        id: ConcernId,
        name: impl Into<String>,
        position: i32,
    ) -> Result<bool> {
        let changed = self
            .backend
            .apply_graph_writes(
                system_id,
                vec![GraphWrite::UpsertConcern {
                    id,
                    name: name.into(),
                    position,
                }],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Upsert an artifact attached to a matrix cell.
    ///
    /// Artifacts are mutable in place; rewriting identical content is a
    /// 0-change no-op.
    #[instrument(skip(self, content))]
    pub async fn put_artifact(
        &self,
        system_id: SystemId,
        id: ArtifactId,
        node_id: NodeId,
        concern_id: ConcernId,
        artifact_type: impl Into<String> + std::fmt::Debug,
        language: Option<String>,
        content: impl Into<String>,
    ) -> Result<bool> {
        let changed = self
            .backend
            .apply_graph_writes(
                system_id,
                vec![GraphWrite::PutArtifact {
                    id,
                    node_id,
                    concern_id,
                    artifact_type: artifact_type.into(),
                    language,
                    content: content.into(),
                }],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Attach a document reference to a matrix cell. Idempotent.
    pub async fn attach_matrix_ref(
        &self,
        system_id: SystemId,
        node_id: NodeId,
        concern_id: ConcernId,
        ref_kind: MatrixRefKind,
        doc_hash: DocHash,
    ) -> Result<bool> {
        let changed = self
            .backend
            .apply_graph_writes(
                system_id,
                vec![GraphWrite::AttachMatrixRef {
                    node_id,
                    concern_id,
                    ref_kind,
                    doc_hash,
                }],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Detach a document reference from a matrix cell. No-op if absent.
    pub async fn detach_matrix_ref(
        &self,
        system_id: SystemId,
        node_id: NodeId,
        concern_id: ConcernId,
        ref_kind: MatrixRefKind,
        doc_hash: DocHash,
    ) -> Result<bool> {
        let changed = self
            .backend
            .apply_graph_writes(
                system_id,
                vec![GraphWrite::DetachMatrixRef {
                    node_id,
                    concern_id,
                    ref_kind,
                    doc_hash,
                }],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Apply a batch of layout moves, returning how many nodes actually moved.
    pub async fn set_node_layout(
        &self,
        system_id: SystemId,
        moves: &[NodeMove],
    ) -> Result<usize> {
        let writes = moves
            .iter()
            .map(|m| GraphWrite::SetNodeLayout {
                node_id: m.node_id,
                x: m.x,
                y: m.y,
            })
            .collect();
        self.backend.apply_graph_writes(system_id, writes).await
    }

    /// Apply an arbitrary batch of writes in one transaction.
    pub async fn apply(&self, system_id: SystemId, writes: Vec<GraphWrite>) -> Result<usize> {
        self.backend.apply_graph_writes(system_id, writes).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch a system snapshot record.
    pub async fn system(&self, id: SystemId) -> Result<SystemRecord> {
        self.backend
            .get_system(id)
            .await?
            .ok_or_else(|| StaffError::not_found("system", id.to_string()))
    }

    pub async fn nodes(&self, system_id: SystemId) -> Result<Vec<NodeRecord>> {
        self.backend.list_nodes(system_id).await
    }

    pub async fn edges(&self, system_id: SystemId) -> Result<Vec<EdgeRecord>> {
        self.backend.list_edges(system_id).await
    }

    pub async fn concerns(&self, system_id: SystemId) -> Result<Vec<ConcernRecord>> {
        self.backend.list_concerns(system_id).await
    }

    pub async fn matrix_refs(&self, system_id: SystemId) -> Result<Vec<MatrixRefRecord>> {
        self.backend.list_matrix_refs(system_id).await
    }

    pub async fn artifact(&self, system_id: SystemId, id: ArtifactId) -> Result<ArtifactRecord> {
        self.backend
            .get_artifact(system_id, id)
            .await?
            .ok_or_else(|| StaffError::not_found("artifact", id.to_string()))
    }
}
