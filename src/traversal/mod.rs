//! Lineage traversal engine.
//!
//! Breadth-first expansion from a root dataset, upstream or downstream,
//! bounded by a depth ceiling and a visited set. Each frontier level is
//! fetched concurrently.
//!
//! Results are memoized per engine in a [`TraversalCache`]. The cache is not
//! invalidated by ingestion; a traversal issued right after an ingestion may
//! return the earlier projection until the entry expires or the caller
//! bypasses the cache.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheKey, CacheStats, TraversalCache};
use crate::config::Settings;
use crate::model::{
    AuditLogEntry, ColumnLineage, Dataset, Direction, LineageEdge, Process, TemporalFilter,
};
use crate::store::{LineageStore, StoreError, StoreResult};

/// Hard depth ceiling; configuration can lower it, never raise it.
pub const MAX_TRAVERSAL_DEPTH: u32 = 5;

/// Default cache bounds.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Errors that can occur during traversal.
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store call `{operation}` timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

pub type TraversalResult<T> = Result<T, TraversalError>;

/// An edge with the BFS level (1-based) at which it was discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversedEdge {
    #[serde(flatten)]
    pub edge: LineageEdge,
    pub depth: u32,
}

/// Subgraph reachable from a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphProjection {
    pub root: String,
    pub direction: Direction,
    /// Depth after clamping.
    pub depth: u32,
    pub as_of: Option<DateTime<Utc>>,
    /// Datasets at either end of an emitted edge, sorted by URN.
    pub datasets: Vec<Dataset>,
    /// Processes of emitted edges, sorted by URN.
    pub processes: Vec<Process>,
    pub edges: Vec<TraversedEdge>,
    pub total_datasets: usize,
    pub total_processes: usize,
}

impl GraphProjection {
    fn empty(root: &str, direction: Direction, depth: u32, as_of: Option<DateTime<Utc>>) -> Self {
        Self {
            root: root.to_string(),
            direction,
            depth,
            as_of,
            datasets: Vec::new(),
            processes: Vec::new(),
            edges: Vec::new(),
            total_datasets: 0,
            total_processes: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// One traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalRequest {
    pub root: String,
    pub direction: Direction,
    pub depth: u32,
    /// Point-in-time query; `None` means currently active edges.
    pub as_of: Option<DateTime<Utc>>,
    pub use_cache: bool,
}

impl TraversalRequest {
    pub fn new(root: impl Into<String>, direction: Direction, depth: u32) -> Self {
        Self {
            root: root.into(),
            direction,
            depth,
            as_of: None,
            use_cache: true,
        }
    }

    pub fn upstream(root: impl Into<String>, depth: u32) -> Self {
        Self::new(root, Direction::Upstream, depth)
    }

    pub fn downstream(root: impl Into<String>, depth: u32) -> Self {
        Self::new(root, Direction::Downstream, depth)
    }

    pub fn as_of(mut self, as_of: Option<DateTime<Utc>>) -> Self {
        self.as_of = as_of;
        self
    }

    /// Skip the cache for both lookup and store.
    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Read-only lineage queries over a [`LineageStore`].
#[derive(Debug)]
pub struct TraversalEngine<S> {
    store: Arc<S>,
    max_depth: u32,
    timeout: Duration,
    cache: Option<TraversalCache<GraphProjection>>,
}

impl<S: LineageStore> TraversalEngine<S> {
    /// Engine with the full depth ceiling and a default-sized cache.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_depth: MAX_TRAVERSAL_DEPTH,
            timeout: crate::ingest::DEFAULT_STORE_TIMEOUT,
            cache: Some(TraversalCache::new(
                DEFAULT_CACHE_MAX_ENTRIES,
                DEFAULT_CACHE_TTL,
            )),
        }
    }

    /// Build from the `[store]` and `[traversal]` settings sections.
    pub fn from_settings(store: Arc<S>, settings: &Settings) -> Self {
        let traversal = &settings.traversal;
        let cache = traversal.cache_enabled.then(|| {
            TraversalCache::new(traversal.cache_max_entries, traversal.cache_ttl())
        });
        Self {
            store,
            max_depth: traversal.max_depth.min(MAX_TRAVERSAL_DEPTH),
            timeout: settings.store.timeout(),
            cache,
        }
    }

    /// Lower the depth ceiling.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth.min(MAX_TRAVERSAL_DEPTH);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the cache; `None` disables caching.
    pub fn with_cache(mut self, cache: Option<TraversalCache<GraphProjection>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> TraversalResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TraversalError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    /// Datasets and processes feeding into `urn`.
    pub async fn get_upstream(
        &self,
        urn: &str,
        depth: u32,
        as_of: Option<DateTime<Utc>>,
    ) -> TraversalResult<GraphProjection> {
        self.traverse(TraversalRequest::upstream(urn, depth).as_of(as_of))
            .await
    }

    /// Datasets and processes fed by `urn`.
    pub async fn get_downstream(
        &self,
        urn: &str,
        depth: u32,
        as_of: Option<DateTime<Utc>>,
    ) -> TraversalResult<GraphProjection> {
        self.traverse(TraversalRequest::downstream(urn, depth).as_of(as_of))
            .await
    }

    /// Run a traversal, consulting the cache unless the request bypasses it.
    pub async fn traverse(&self, request: TraversalRequest) -> TraversalResult<GraphProjection> {
        let depth = request.depth.min(self.max_depth);
        let cache = self.cache.as_ref().filter(|_| request.use_cache);
        let key = CacheKey::new(request.direction, &request.root, depth, request.as_of);

        if let Some(hit) = cache.and_then(|c| c.get(&key)) {
            debug!(
                root = %request.root,
                direction = %request.direction,
                depth,
                "traversal cache hit"
            );
            return Ok(hit);
        }

        let projection = self
            .expand(&request.root, request.direction, depth, request.as_of)
            .await?;

        if let Some(cache) = cache {
            cache.insert(key, projection.clone());
        }
        Ok(projection)
    }

    /// Breadth-first expansion.
    async fn expand(
        &self,
        root: &str,
        direction: Direction,
        depth: u32,
        as_of: Option<DateTime<Utc>>,
    ) -> TraversalResult<GraphProjection> {
        let mut projection = GraphProjection::empty(root, direction, depth, as_of);
        if depth == 0 {
            return Ok(projection);
        }
        if self
            .bounded("get_dataset", self.store.get_dataset(root))
            .await?
            .is_none()
        {
            debug!(%root, "traversal root not found");
            return Ok(projection);
        }

        let filter = match as_of {
            Some(t) => TemporalFilter::AsOf(t),
            None => TemporalFilter::Current(Utc::now()),
        };

        let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
        let mut seen_edges: HashSet<i64> = HashSet::new();
        let mut frontier = vec![root.to_string()];

        for level in 1..=depth {
            if frontier.is_empty() {
                break;
            }

            let calls: Vec<_> = frontier
                .iter()
                .map(|urn| self.store.edges_for(urn, direction, filter))
                .collect();
            let adjacent = self
                .bounded("edges_for", futures::future::try_join_all(calls))
                .await?;

            let mut next = Vec::new();
            for edge in adjacent.into_iter().flatten() {
                if !seen_edges.insert(edge.id) {
                    continue;
                }
                let node = edge.next_node(direction);
                if visited.insert(node.to_string()) {
                    next.push(node.to_string());
                }
                projection.edges.push(TraversedEdge { edge, depth: level });
            }
            frontier = next;
        }

        let dataset_urns: Vec<String> = projection
            .edges
            .iter()
            .flat_map(|e| [e.edge.source_urn.clone(), e.edge.target_urn.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let process_urns: Vec<String> = projection
            .edges
            .iter()
            .map(|e| e.edge.process_urn.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut datasets = self
            .bounded("get_datasets", self.store.get_datasets(&dataset_urns))
            .await?;
        datasets.sort_by(|a, b| a.urn.cmp(&b.urn));
        let mut processes = self
            .bounded("get_processes", self.store.get_processes(&process_urns))
            .await?;
        processes.sort_by(|a, b| a.urn.cmp(&b.urn));

        projection.total_datasets = datasets.len();
        projection.total_processes = processes.len();
        projection.datasets = datasets;
        projection.processes = processes;

        debug!(
            %root,
            %direction,
            depth,
            edges = projection.edges.len(),
            datasets = projection.total_datasets,
            "traversal complete"
        );
        Ok(projection)
    }

    /// Column mappings attached to an edge.
    pub async fn column_lineage(&self, edge_id: i64) -> TraversalResult<Vec<ColumnLineage>> {
        self.bounded("column_lineage", self.store.column_lineage(edge_id))
            .await
    }

    /// Audit history of a dataset, process or edge key, oldest first.
    pub async fn audit_trail(&self, entity_urn: &str) -> TraversalResult<Vec<AuditLogEntry>> {
        self.bounded("audit_log", self.store.audit_log(entity_urn))
            .await
    }

    /// Drop every cached projection.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Cache counters; all zero when caching is disabled.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .as_ref()
            .map(TraversalCache::stats)
            .unwrap_or_default()
    }
}
