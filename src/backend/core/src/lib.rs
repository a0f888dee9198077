//! # StaffX Core
//!
//! The backend state machine behind StaffX's collaborative system design
//! threads: teams evolve a versioned description of a software system (a
//! graph of nodes and edges annotated with documents and generated
//! artifacts) through chat-driven threads, while an AI agent executes edits
//! asynchronously.
//!
//! ## Architecture
//!
//! - **Content Store**: content-addressed, deduplicating documents and
//!   mutable artifacts
//! - **Graph Store**: nodes/edges/concerns/matrix refs scoped to immutable
//!   System snapshots
//! - **Action Chain**: per-thread ordered action log with copy-on-write
//!   system forking; the single source of "the graph as it stands now"
//! - **Run Queue**: agent-run state machine with skip-locked claiming and
//!   at-most-one running run per thread
//! - **Event Log**: append-only, cursor-paginated event stream with a
//!   broadcast push transport
//! - **Thread Manager**: projects, threads, chat, and matrix operations
//!   composed over the components above
//!
//! Transports (HTTP routes, the desktop worker) are thin callers of the
//! services bundled in [`Core`]; persistence sits behind the
//! [`store::Backend`] trait with PostgreSQL and in-memory implementations.

pub mod chain;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;
pub mod pagination;
pub mod rbac;
pub mod runs;
pub mod store;
pub mod telemetry;
pub mod threads;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorKind, Result, StaffError};

use std::sync::Arc;

use chain::ActionChain;
use config::{EventsConfig, StaffConfig};
use content::ContentStore;
use events::EventLog;
use graph::GraphStore;
use runs::RunQueue;
use store::{Backend, MemoryBackend, PostgresBackend};
use threads::ThreadManager;

/// All core services wired over one shared backend.
///
/// This is the object transports hold; every field is a cheaply cloneable
/// service facade.
#[derive(Clone)]
pub struct Core {
    pub backend: Arc<dyn Backend>,
    pub events: EventLog,
    pub content: ContentStore,
    pub graph: GraphStore,
    pub chain: ActionChain,
    pub runs: RunQueue,
    pub threads: ThreadManager,
}

impl Core {
    /// Wire the services over an existing backend.
    pub fn new(backend: Arc<dyn Backend>, events_config: EventsConfig) -> Self {
        let events = EventLog::new(backend.clone(), events_config);
        let content = ContentStore::new(backend.clone());
        let graph = GraphStore::new(backend.clone());
        let chain = ActionChain::new(backend.clone());
        let runs = RunQueue::new(backend.clone(), events.clone());
        let threads = ThreadManager::new(
            backend.clone(),
            events.clone(),
            chain.clone(),
            graph.clone(),
        );

        Self {
            backend,
            events,
            content,
            graph,
            chain,
            runs,
            threads,
        }
    }

    /// An in-memory core for tests and local simulation.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), EventsConfig::default())
    }

    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(config: &StaffConfig) -> Result<Self> {
        let backend = PostgresBackend::connect(&config.database).await?;
        backend.migrate().await?;
        Ok(Self::new(Arc::new(backend), config.events.clone()))
    }
}

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::chain::{ActionChain, ActionId, ActionRecord, ActionType, NewAction};
    pub use crate::content::{content_hash, ContentStore, DocHash, DocumentKind, DocumentRecord};
    pub use crate::error::{ErrorCode, ErrorKind, Result, StaffError};
    pub use crate::events::{
        EventLog, EventPage, EventQuery, EventType, NewEvent, StaffXEvent,
    };
    pub use crate::graph::{
        ArtifactId, ArtifactRecord, ConcernId, ConcernRecord, EdgeId, EdgeKind, EdgeRecord,
        GraphStore, GraphWrite, MatrixRefKind, MatrixRefRecord, NodeId, NodeKind, NodeMove,
        NodeRecord, SystemId,
    };
    pub use crate::pagination::EventCursor;
    pub use crate::rbac::{Actor, MemberRole};
    pub use crate::runs::{
        AgentExecutor, ExecutionOutcome, ExecutionRequest, ExecutionStatus, RunId, RunMode,
        RunQueue, RunRecord, RunStatus, RunWorker, SimulatedExecutor,
    };
    pub use crate::store::{Backend, MemoryBackend, PostgresBackend};
    pub use crate::threads::{
        ProjectId, ProjectRecord, ThreadId, ThreadManager, ThreadPatch, ThreadRecord,
        ThreadStatus,
    };
    pub use crate::Core;
}
