//! Lineage ingestion engine.
//!
//! The engine is the only writer of the lineage graph. One call to
//! [`IngestionEngine::ingest`] runs:
//!
//! ```text
//! validate ─► ingestion id ─► already ingested? ──yes──► skipped
//!                                  │ no
//!                                  ▼
//!              phase 1: process upsert, datasets, inputs × outputs edges, audit
//!                                  │  (edge ids)
//!                                  ▼
//!              phase 2: column mappings attached to every created edge
//! ```
//!
//! Each phase is atomic in the store. Two concurrent ingestions with the same
//! id race on the store's edge-key constraint; the loser reports `skipped`.

mod request;

pub use request::{
    IngestOutcome, IngestRequest, IngestStatus, ProcessDescriptor, DEFAULT_PROCESS_TYPE,
};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ingestion_key;
use crate::config::Settings;
use crate::model::{
    AuditAction, AuditLogEntry, Dataset, EntityType, LineageEdge, NewColumnLineage, NewEdge,
    Process, DEFAULT_RELATIONSHIP_TYPE,
};
use crate::store::{GraphBatch, LineageStore, ProcessWrite, StoreError, StoreResult};

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Actor recorded when neither the request nor the engine names one.
pub const DEFAULT_ACTOR: &str = "system";

/// Errors that fail an ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid ingestion request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store call `{operation}` timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("failed to serialize ingestion state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes lineage into a [`LineageStore`].
#[derive(Debug)]
pub struct IngestionEngine<S> {
    store: Arc<S>,
    timeout: Duration,
    default_actor: String,
}

impl<S> Clone for IngestionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
            default_actor: self.default_actor.clone(),
        }
    }
}

impl<S: LineageStore> IngestionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
            default_actor: DEFAULT_ACTOR.to_string(),
        }
    }

    /// Build from the `[store]` and `[ingest]` settings sections.
    pub fn from_settings(store: Arc<S>, settings: &Settings) -> Self {
        Self::new(store)
            .with_timeout(settings.store.timeout())
            .with_default_actor(settings.ingest.default_actor.clone())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_default_actor(mut self, actor: impl Into<String>) -> Self {
        self.default_actor = actor.into();
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, IngestError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IngestError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    /// Ingest one process execution.
    ///
    /// Returns `skipped` without writing if the ingestion id is already
    /// present, including when a concurrent ingestion with the same id wins
    /// the race.
    ///
    /// # Errors
    ///
    /// - [`IngestError::InvalidRequest`] for an empty process URN, inputs or outputs
    /// - [`IngestError::Store`] / [`IngestError::Timeout`] when a phase fails;
    ///   the failing phase is rolled back, earlier phases stay committed
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let process_urn = request.process.urn.trim().to_string();
        if process_urn.is_empty() {
            return Err(IngestError::InvalidRequest(
                "process URN must not be empty".to_string(),
            ));
        }
        let inputs = dedup_urns(&request.inputs, "inputs")?;
        let outputs = dedup_urns(&request.outputs, "outputs")?;

        let ingestion_id = match request.ingestion_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => ingestion_key(&process_urn, &inputs, &outputs)?,
        };
        let actor = request
            .actor
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.default_actor.clone());

        let existing = self
            .bounded(
                "count_edges_for_ingestion",
                self.store.count_edges_for_ingestion(&ingestion_id),
            )
            .await?;
        if existing > 0 {
            info!(%ingestion_id, existing, "ingestion already applied, skipping");
            return Ok(IngestOutcome::skipped(ingestion_id, existing));
        }

        // Phase 1
        let now = Utc::now();
        let previous = self
            .bounded("get_process", self.store.get_process(&process_urn))
            .await?;
        let batch = build_batch(
            &request,
            &process_urn,
            previous,
            &inputs,
            &outputs,
            &ingestion_id,
            &actor,
            now,
        )?;

        let edges = match self
            .bounded("commit_graph", self.store.commit_graph(batch))
            .await
        {
            Ok(edges) => edges,
            Err(IngestError::Store(StoreError::DuplicateEdge { .. })) => {
                let existing = self
                    .bounded(
                        "count_edges_for_ingestion",
                        self.store.count_edges_for_ingestion(&ingestion_id),
                    )
                    .await?;
                info!(%ingestion_id, existing, "lost ingestion race, skipping");
                return Ok(IngestOutcome::skipped(ingestion_id, existing));
            }
            Err(e) => return Err(e),
        };

        // Phase 2
        let rows = column_rows(&edges, &request);
        let mut warnings = Vec::new();
        let mut columns_ingested = 0;
        if !rows.is_empty() {
            let report = self
                .bounded(
                    "attach_column_lineage",
                    self.store.attach_column_lineage(rows),
                )
                .await?;
            columns_ingested = report.inserted;
            for edge_id in report.missing_edges {
                warn!(%ingestion_id, edge_id, "column mapping skipped, edge not found");
                warnings.push(format!(
                    "column mappings for edge {} skipped: edge not found",
                    edge_id
                ));
            }
        }

        info!(
            %ingestion_id,
            process = %process_urn,
            edges = edges.len(),
            columns = columns_ingested,
            "ingestion complete"
        );

        Ok(IngestOutcome {
            status: IngestStatus::Success,
            ingestion_id,
            edges_created: edges.len(),
            columns_ingested,
            warnings,
        })
    }

    /// Close every active edge of a process at `at` (default now).
    ///
    /// Closed edges drop out of current-state traversals but remain visible
    /// to point-in-time queries inside their validity window.
    pub async fn retire_edges(
        &self,
        process_urn: &str,
        at: Option<DateTime<Utc>>,
        actor: Option<&str>,
    ) -> Result<Vec<LineageEdge>, IngestError> {
        let at = at.unwrap_or_else(Utc::now);
        let actor = actor.unwrap_or(&self.default_actor);
        let closed = self
            .bounded(
                "close_active_edges",
                self.store.close_active_edges(process_urn, at, actor),
            )
            .await?;
        info!(process = %process_urn, closed = closed.len(), "retired edges");
        Ok(closed)
    }
}

/// Trim, reject empties and collapse duplicates in first-seen order.
fn dedup_urns(urns: &[String], field: &str) -> Result<Vec<String>, IngestError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(urns.len());
    for urn in urns {
        let urn = urn.trim();
        if urn.is_empty() {
            return Err(IngestError::InvalidRequest(format!(
                "{} contains an empty URN",
                field
            )));
        }
        if seen.insert(urn) {
            out.push(urn.to_string());
        }
    }
    if out.is_empty() {
        return Err(IngestError::InvalidRequest(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(out)
}

/// Fields the descriptor leaves unset keep their stored values.
fn merge_process(
    descriptor: &ProcessDescriptor,
    process_urn: &str,
    previous: Option<&Process>,
    now: DateTime<Utc>,
) -> Process {
    let name = match previous {
        Some(p) if descriptor.name.trim().is_empty() => p.name.clone(),
        _ => descriptor.display_name(),
    };
    let process_type = descriptor
        .process_type
        .clone()
        .or_else(|| previous.map(|p| p.process_type.clone()))
        .unwrap_or_else(|| DEFAULT_PROCESS_TYPE.to_string());
    Process {
        urn: process_urn.to_string(),
        name,
        process_type,
        source_system: descriptor
            .source_system
            .clone()
            .or_else(|| previous.and_then(|p| p.source_system.clone())),
        job_id: descriptor
            .job_id
            .clone()
            .or_else(|| previous.and_then(|p| p.job_id.clone())),
        job_name: descriptor
            .job_name
            .clone()
            .or_else(|| previous.and_then(|p| p.job_name.clone())),
        definition: descriptor
            .definition
            .clone()
            .or_else(|| previous.and_then(|p| p.definition.clone())),
        created_at: previous.map_or(now, |p| p.created_at),
        updated_at: now,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_batch(
    request: &IngestRequest,
    process_urn: &str,
    previous: Option<Process>,
    inputs: &[String],
    outputs: &[String],
    ingestion_id: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<GraphBatch, IngestError> {
    let descriptor = &request.process;
    let process = merge_process(descriptor, process_urn, previous.as_ref(), now);
    let action = if previous.is_some() {
        AuditAction::Update
    } else {
        AuditAction::Create
    };
    let process_audit = AuditLogEntry::new(action, EntityType::Process, process_urn, actor, now)
        .with_before(previous.as_ref().map(serde_json::to_value).transpose()?)
        .with_after(Some(serde_json::to_value(&process)?))
        .with_ingestion(ingestion_id);

    let mut seen = HashSet::new();
    let mut datasets = Vec::new();
    for urn in inputs.iter().chain(outputs) {
        if !seen.insert(urn.as_str()) {
            continue;
        }
        let dataset = Dataset::minimal(urn, now);
        let audit = AuditLogEntry::new(AuditAction::Create, EntityType::Dataset, urn, actor, now)
            .with_after(Some(serde_json::to_value(&dataset)?))
            .with_ingestion(ingestion_id);
        datasets.push((dataset, audit));
    }

    let relationship_type = descriptor
        .relationship_type
        .clone()
        .unwrap_or_else(|| DEFAULT_RELATIONSHIP_TYPE.to_string());
    let mut edges = Vec::with_capacity(inputs.len() * outputs.len());
    for source in inputs {
        for target in outputs {
            let edge = NewEdge {
                source_urn: source.clone(),
                process_urn: process_urn.to_string(),
                target_urn: target.clone(),
                relationship_type: relationship_type.clone(),
                valid_from: now,
                ingestion_id: ingestion_id.to_string(),
                metadata: None,
            };
            let audit = AuditLogEntry::new(
                AuditAction::Create,
                EntityType::LineageEdge,
                edge.audit_key(),
                actor,
                now,
            )
            .with_after(Some(serde_json::to_value(&edge)?))
            .with_ingestion(ingestion_id);
            edges.push((edge, audit));
        }
    }

    debug!(
        %ingestion_id,
        datasets = datasets.len(),
        edges = edges.len(),
        "built ingestion batch"
    );

    Ok(GraphBatch {
        ingestion_id: ingestion_id.to_string(),
        process: ProcessWrite {
            process,
            audit: process_audit,
        },
        datasets,
        edges,
    })
}

/// Every column mapping on every created edge.
fn column_rows(edges: &[LineageEdge], request: &IngestRequest) -> Vec<NewColumnLineage> {
    edges
        .iter()
        .flat_map(|edge| {
            request.column_mappings.iter().map(|m| NewColumnLineage {
                edge_id: edge.id,
                source_column: m.source_column.clone(),
                target_column: m.target_column.clone(),
                transformation_type: m.transformation_type.as_str().to_string(),
                transformation_expression: m.expression.clone(),
            })
        })
        .collect()
}
