//! Graph model: immutable System snapshots and the rows scoped to them.
//!
//! A [`SystemId`] names one version of the full graph. Rows (nodes, edges,
//! concerns, matrix refs, artifacts) belong to exactly one system; forking a
//! system copies its rows under a fresh id so past views stay stable while
//! the newest fork absorbs edits. Only the action chain creates systems; see
//! [`crate::chain`].

mod store;

pub use store::GraphStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::DocHash;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of one immutable graph snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub Uuid);

impl SystemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SystemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a concern (matrix column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConcernId(pub Uuid);

impl ConcernId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConcernId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConcernId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an artifact within a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of a node in the system tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Root,
    Host,
    Container,
    Process,
    Library,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Host => "host",
            Self::Container => "container",
            Self::Process => "process",
            Self::Library => "library",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "root" => Some(Self::Root),
            "host" => Some(Self::Host),
            "container" => Some(Self::Container),
            "process" => Some(Self::Process),
            "library" => Some(Self::Library),
            _ => None,
        }
    }
}

/// Kind of a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Runtime,
    Dataflow,
    Dependency,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Dataflow => "dataflow",
            Self::Dependency => "dependency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "runtime" => Some(Self::Runtime),
            "dataflow" => Some(Self::Dataflow),
            "dependency" => Some(Self::Dependency),
            _ => None,
        }
    }
}

/// Role a referenced document plays in a matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixRefKind {
    Document,
    Skill,
    Prompt,
}

impl MatrixRefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Skill => "skill",
            Self::Prompt => "prompt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "skill" => Some(Self::Skill),
            "prompt" => Some(Self::Prompt),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// One immutable graph snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRecord {
    pub id: SystemId,
    /// The snapshot this one was forked from; None for seed systems.
    pub forked_from: Option<SystemId>,
    pub created_at: DateTime<Utc>,
}

/// A node row, scoped to one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub system_id: SystemId,
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub parent: Option<NodeId>,
    /// Free-form metadata; layout coordinates live under `layout.{x,y}`.
    pub metadata: serde_json::Value,
}

/// A directed edge row, scoped to one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub system_id: SystemId,
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub from: NodeId,
    pub to: NodeId,
    pub metadata: serde_json::Value,
}

/// A concern (matrix column) row, scoped to one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcernRecord {
    pub system_id: SystemId,
    pub id: ConcernId,
    pub name: String,
    pub position: i32,
}

/// Membership of a document in a matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixRefRecord {
    pub system_id: SystemId,
    pub node_id: NodeId,
    pub concern_id: ConcernId,
    pub ref_kind: MatrixRefKind,
    pub doc_hash: DocHash,
}

/// Generated content attached to a matrix cell; mutable in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub system_id: SystemId,
    pub id: ArtifactId,
    pub node_id: NodeId,
    pub concern_id: ConcernId,
    pub artifact_type: String,
    pub language: Option<String>,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Writes
// ═══════════════════════════════════════════════════════════════════════════════

/// A layout move for one node, applied by `patch_matrix_layout`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeMove {
    pub node_id: NodeId,
    pub x: f64,
    pub y: f64,
}

/// A single graph mutation, applied within one system scope.
///
/// Backends apply a batch of writes in one transaction and report how many
/// rows actually changed; idempotent re-application counts zero. Writes fail
/// with a referential error when the node/concern/document they point at
/// does not exist in the target system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphWrite {
    UpsertNode {
        id: NodeId,
        kind: NodeKind,
        name: String,
        parent: Option<NodeId>,
        metadata: serde_json::Value,
    },
    UpsertEdge {
        id: EdgeId,
        kind: EdgeKind,
        from: NodeId,
        to: NodeId,
        metadata: serde_json::Value,
    },
    UpsertConcern {
        id: ConcernId,
        name: String,
        position: i32,
    },
    SetNodeLayout {
        node_id: NodeId,
        x: f64,
        y: f64,
    },
    AttachMatrixRef {
        node_id: NodeId,
        concern_id: ConcernId,
        ref_kind: MatrixRefKind,
        doc_hash: DocHash,
    },
    DetachMatrixRef {
        node_id: NodeId,
        concern_id: ConcernId,
        ref_kind: MatrixRefKind,
        doc_hash: DocHash,
    },
    PutArtifact {
        id: ArtifactId,
        node_id: NodeId,
        concern_id: ConcernId,
        artifact_type: String,
        language: Option<String>,
        content: String,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Layout helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Read a node's layout coordinates from its metadata, if present.
pub fn node_layout(node: &NodeRecord) -> Option<(f64, f64)> {
    let layout = node.metadata.get("layout")?;
    let x = layout.get("x")?.as_f64()?;
    let y = layout.get("y")?.as_f64()?;
    Some((x, y))
}

/// Return metadata with the layout coordinates replaced.
pub fn with_layout(metadata: &serde_json::Value, x: f64, y: f64) -> serde_json::Value {
    let mut map = match metadata {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    map.insert("layout".into(), serde_json::json!({ "x": x, "y": y }));
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_metadata(metadata: serde_json::Value) -> NodeRecord {
        NodeRecord {
            system_id: SystemId::new(),
            id: NodeId::new(),
            kind: NodeKind::Process,
            name: "api".into(),
            parent: None,
            metadata,
        }
    }

    #[test]
    fn test_layout_roundtrip() {
        let node = node_with_metadata(with_layout(&serde_json::json!({"color": "red"}), 10.0, -4.5));
        assert_eq!(node_layout(&node), Some((10.0, -4.5)));
        // Unrelated metadata keys survive the layout write.
        assert_eq!(node.metadata.get("color").unwrap(), "red");
    }

    #[test]
    fn test_layout_absent() {
        let node = node_with_metadata(serde_json::json!({}));
        assert_eq!(node_layout(&node), None);

        let node = node_with_metadata(serde_json::Value::Null);
        assert_eq!(node_layout(&node), None);
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            NodeKind::Root,
            NodeKind::Host,
            NodeKind::Container,
            NodeKind::Process,
            NodeKind::Library,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        for kind in [EdgeKind::Runtime, EdgeKind::Dataflow, EdgeKind::Dependency] {
            assert_eq!(EdgeKind::parse(kind.as_str()), Some(kind));
        }
    }
}
