//! In-memory lineage store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    close_audit, AttachReport, GraphBatch, LineageStore, ProcessWrite, StoreError, StoreResult,
};
use crate::model::{
    AuditLogEntry, ColumnLineage, Dataset, Direction, LineageEdge, NewColumnLineage, Process,
    TemporalFilter,
};

/// Write operations that can be made to fail once, for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CommitGraph,
    AttachColumnLineage,
    CloseActiveEdges,
}

type EdgeKey = (String, String, String, String);

#[derive(Debug, Default)]
struct State {
    datasets: HashMap<String, Dataset>,
    processes: HashMap<String, Process>,
    /// Edge with id `n` is at index `n - 1`.
    edges: Vec<LineageEdge>,
    edge_keys: HashSet<EdgeKey>,
    columns: Vec<ColumnLineage>,
    audit: Vec<AuditLogEntry>,
    failures: HashSet<FailurePoint>,
}

impl State {
    fn take_failure(&mut self, point: FailurePoint) -> StoreResult<()> {
        if self.failures.remove(&point) {
            return Err(StoreError::Injected(point));
        }
        Ok(())
    }

    fn edge(&self, id: i64) -> Option<&LineageEdge> {
        usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.edges.get(i))
    }
}

fn edge_key(source: &str, process: &str, target: &str, ingestion_id: &str) -> EdgeKey {
    (
        source.to_string(),
        process.to_string(),
        target.to_string(),
        ingestion_id.to_string(),
    )
}

/// Lineage store backed by in-process maps.
///
/// Each write validates before it mutates, so a failed write leaves no
/// partial state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call at `point` fail with [`StoreError::Injected`].
    pub async fn fail_next(&self, point: FailurePoint) {
        self.state.write().await.failures.insert(point);
    }

    /// Total number of edges.
    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }

    /// Total number of audit entries.
    pub async fn audit_count(&self) -> usize {
        self.state.read().await.audit.len()
    }
}

#[async_trait]
impl LineageStore for MemoryStore {
    async fn get_dataset(&self, urn: &str) -> StoreResult<Option<Dataset>> {
        Ok(self.state.read().await.datasets.get(urn).cloned())
    }

    async fn get_process(&self, urn: &str) -> StoreResult<Option<Process>> {
        Ok(self.state.read().await.processes.get(urn).cloned())
    }

    async fn count_edges_for_ingestion(&self, ingestion_id: &str) -> StoreResult<usize> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.ingestion_id == ingestion_id)
            .count())
    }

    async fn edges_for(
        &self,
        urn: &str,
        direction: Direction,
        filter: TemporalFilter,
    ) -> StoreResult<Vec<LineageEdge>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| match direction {
                Direction::Upstream => e.target_urn == urn,
                Direction::Downstream => e.source_urn == urn,
            })
            .filter(|e| filter.admits(e))
            .cloned()
            .collect())
    }

    async fn column_lineage(&self, edge_id: i64) -> StoreResult<Vec<ColumnLineage>> {
        let state = self.state.read().await;
        Ok(state
            .columns
            .iter()
            .filter(|c| c.edge_id == edge_id)
            .cloned()
            .collect())
    }

    async fn commit_graph(&self, batch: GraphBatch) -> StoreResult<Vec<LineageEdge>> {
        let mut state = self.state.write().await;
        state.take_failure(FailurePoint::CommitGraph)?;

        let mut batch_keys = HashSet::new();
        for (edge, _) in &batch.edges {
            let key = edge_key(
                &edge.source_urn,
                &edge.process_urn,
                &edge.target_urn,
                &edge.ingestion_id,
            );
            if state.edge_keys.contains(&key) || !batch_keys.insert(key) {
                return Err(StoreError::DuplicateEdge {
                    ingestion_id: edge.ingestion_id.clone(),
                });
            }
        }

        let ProcessWrite { process, audit } = batch.process;
        let process = match state.processes.get(&process.urn) {
            Some(existing) => Process {
                created_at: existing.created_at,
                ..process
            },
            None => process,
        };
        state.processes.insert(process.urn.clone(), process);
        state.audit.push(audit);

        for (dataset, audit) in batch.datasets {
            if !state.datasets.contains_key(&dataset.urn) {
                state.datasets.insert(dataset.urn.clone(), dataset);
                state.audit.push(audit);
            }
        }

        let mut created = Vec::with_capacity(batch.edges.len());
        for (edge, audit) in batch.edges {
            let id = state.edges.len() as i64 + 1;
            state.edge_keys.insert(edge_key(
                &edge.source_urn,
                &edge.process_urn,
                &edge.target_urn,
                &edge.ingestion_id,
            ));
            let edge = edge.with_id(id);
            state.edges.push(edge.clone());
            state.audit.push(audit);
            created.push(edge);
        }

        Ok(created)
    }

    async fn attach_column_lineage(
        &self,
        rows: Vec<NewColumnLineage>,
    ) -> StoreResult<AttachReport> {
        let mut state = self.state.write().await;
        state.take_failure(FailurePoint::AttachColumnLineage)?;

        let mut report = AttachReport::default();
        for row in rows {
            if state.edge(row.edge_id).is_none() {
                if !report.missing_edges.contains(&row.edge_id) {
                    report.missing_edges.push(row.edge_id);
                }
                continue;
            }
            let id = state.columns.len() as i64 + 1;
            state.columns.push(row.with_id(id));
            report.inserted += 1;
        }
        Ok(report)
    }

    async fn close_active_edges(
        &self,
        process_urn: &str,
        valid_to: DateTime<Utc>,
        actor: &str,
    ) -> StoreResult<Vec<LineageEdge>> {
        let mut state = self.state.write().await;
        state.take_failure(FailurePoint::CloseActiveEdges)?;

        let mut closed = Vec::new();
        let mut entries = Vec::new();
        for edge in state
            .edges
            .iter()
            .filter(|e| e.process_urn == process_urn && e.valid_to.is_none())
        {
            let after = LineageEdge {
                valid_to: Some(valid_to),
                ..edge.clone()
            };
            entries.push(close_audit(edge, &after, actor, valid_to)?);
            closed.push(after);
        }

        for after in &closed {
            if let Some(edge) = usize::try_from(after.id - 1)
                .ok()
                .and_then(|i| state.edges.get_mut(i))
            {
                edge.valid_to = after.valid_to;
            }
        }
        state.audit.extend(entries);
        Ok(closed)
    }

    async fn audit_log(&self, entity_urn: &str) -> StoreResult<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .filter(|a| a.entity_urn == entity_urn)
            .cloned()
            .collect())
    }
}
