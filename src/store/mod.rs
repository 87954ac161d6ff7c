//! Lineage store interface.
//!
//! Engines talk to persistence only through [`LineageStore`]. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`] - `RwLock`-guarded maps, used by tests and embedders
//! - [`SqliteStore`] - `rusqlite` database, the default persistent backend
//!
//! # Write Phases
//!
//! Ingestion writes in two phases, each atomic:
//!
//! ```text
//! commit_graph            process upsert + datasets + edges + audit
//!      │
//!      ▼ (edge ids)
//! attach_column_lineage   column rows referencing edge ids
//! ```
//!
//! The store's uniqueness constraint on
//! `(source_urn, process_urn, target_urn, ingestion_id)` is reported as
//! [`StoreError::DuplicateEdge`] so the caller can treat a lost race as an
//! idempotent no-op.

mod memory;
mod sqlite;

pub use memory::{FailurePoint, MemoryStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{
    AuditLogEntry, ColumnLineage, Dataset, Direction, LineageEdge, NewColumnLineage, NewEdge,
    Process, TemporalFilter,
};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lineage edge already exists for ingestion {ingestion_id}")]
    DuplicateEdge { ingestion_id: String },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to determine data directory")]
    NoDataDir,

    #[error("store schema version {found} does not match expected version {expected}")]
    SchemaVersion { found: i32, expected: i32 },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("blocking store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("injected failure at {0:?}")]
    Injected(FailurePoint),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Process upsert with its audit entry.
#[derive(Debug, Clone)]
pub struct ProcessWrite {
    pub process: Process,
    pub audit: AuditLogEntry,
}

/// Everything written by the first ingestion phase.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    pub ingestion_id: String,
    pub process: ProcessWrite,
    /// Inserted only if absent; the audit entry is written only on insert.
    pub datasets: Vec<(Dataset, AuditLogEntry)>,
    pub edges: Vec<(NewEdge, AuditLogEntry)>,
}

/// Outcome of attaching column lineage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    pub inserted: usize,
    /// Edge ids referenced by rows that were skipped.
    pub missing_edges: Vec<i64>,
}

/// Repository interface consumed by the ingestion and traversal engines.
///
/// # Example
///
/// ```ignore
/// use tributary::store::{LineageStore, MemoryStore};
///
/// async fn example(store: &impl LineageStore) -> StoreResult<()> {
///     let edges = store
///         .edges_for("urn:dataset:x", Direction::Downstream, TemporalFilter::Current(Utc::now()))
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LineageStore: Send + Sync {
    // =========================================================================
    // Entities
    // =========================================================================

    async fn get_dataset(&self, urn: &str) -> StoreResult<Option<Dataset>>;

    async fn get_process(&self, urn: &str) -> StoreResult<Option<Process>>;

    /// Batch fetch datasets; absent URNs are omitted.
    ///
    /// Default implementation fetches concurrently using `try_join_all`.
    async fn get_datasets(&self, urns: &[String]) -> StoreResult<Vec<Dataset>> {
        let futures: Vec<_> = urns.iter().map(|urn| self.get_dataset(urn)).collect();
        let results = futures::future::try_join_all(futures).await?;
        Ok(results.into_iter().flatten().collect())
    }

    /// Batch fetch processes; absent URNs are omitted.
    async fn get_processes(&self, urns: &[String]) -> StoreResult<Vec<Process>> {
        let futures: Vec<_> = urns.iter().map(|urn| self.get_process(urn)).collect();
        let results = futures::future::try_join_all(futures).await?;
        Ok(results.into_iter().flatten().collect())
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Number of edges created by an ingestion.
    async fn count_edges_for_ingestion(&self, ingestion_id: &str) -> StoreResult<usize>;

    /// Edges adjacent to `urn` in `direction` that pass `filter`, by id.
    ///
    /// Upstream returns edges whose target is `urn`; downstream, whose
    /// source is `urn`.
    async fn edges_for(
        &self,
        urn: &str,
        direction: Direction,
        filter: TemporalFilter,
    ) -> StoreResult<Vec<LineageEdge>>;

    async fn column_lineage(&self, edge_id: i64) -> StoreResult<Vec<ColumnLineage>>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Phase one: apply a batch atomically and return the created edges.
    async fn commit_graph(&self, batch: GraphBatch) -> StoreResult<Vec<LineageEdge>>;

    /// Phase two: attach column rows atomically, skipping rows whose edge
    /// does not exist.
    async fn attach_column_lineage(&self, rows: Vec<NewColumnLineage>)
        -> StoreResult<AttachReport>;

    /// Close every open edge of a process at `valid_to`, writing one
    /// `update` audit entry per edge.
    async fn close_active_edges(
        &self,
        process_urn: &str,
        valid_to: DateTime<Utc>,
        actor: &str,
    ) -> StoreResult<Vec<LineageEdge>>;

    // =========================================================================
    // Audit
    // =========================================================================

    /// Audit entries for an entity, oldest first.
    async fn audit_log(&self, entity_urn: &str) -> StoreResult<Vec<AuditLogEntry>>;
}

/// `update` audit entry for closing an edge.
pub(crate) fn close_audit(
    before: &LineageEdge,
    after: &LineageEdge,
    actor: &str,
    at: DateTime<Utc>,
) -> StoreResult<AuditLogEntry> {
    Ok(AuditLogEntry::new(
        crate::model::AuditAction::Update,
        crate::model::EntityType::LineageEdge,
        before.audit_key(),
        actor,
        at,
    )
    .with_before(Some(serde_json::to_value(before)?))
    .with_after(Some(serde_json::to_value(after)?))
    .with_ingestion(before.ingestion_id.clone()))
}
