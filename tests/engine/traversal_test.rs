use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use tributary::cache::TraversalCache;
use tributary::ingest::{IngestRequest, IngestionEngine, ProcessDescriptor};
use tributary::model::{
    AuditAction, AuditLogEntry, Dataset, Direction, EntityType, LineageEdge, NewEdge, Process,
    DEFAULT_RELATIONSHIP_TYPE,
};
use tributary::store::{GraphBatch, LineageStore, MemoryStore, ProcessWrite};
use tributary::traversal::{TraversalEngine, TraversalRequest, MAX_TRAVERSAL_DEPTH};

fn urn(name: &str) -> String {
    format!("urn:dataset:test:{}", name)
}

fn proc_urn(name: &str) -> String {
    format!("urn:process:test:{}", name)
}

async fn ingest(engine: &IngestionEngine<MemoryStore>, process: &str, input: &str, output: &str) {
    engine
        .ingest(IngestRequest::new(
            ProcessDescriptor::new(proc_urn(process)),
            vec![urn(input)],
            vec![urn(output)],
        ))
        .await
        .unwrap();
}

fn setup() -> (
    Arc<MemoryStore>,
    IngestionEngine<MemoryStore>,
    TraversalEngine<MemoryStore>,
) {
    let store = Arc::new(MemoryStore::new());
    let ingest = IngestionEngine::new(store.clone());
    let traversal = TraversalEngine::new(store.clone());
    (store, ingest, traversal)
}

/// Write one edge directly with a chosen start of validity.
async fn seed_edge(
    store: &MemoryStore,
    process: &str,
    source: &str,
    target: &str,
    valid_from: DateTime<Utc>,
) -> LineageEdge {
    let ingestion_id = format!("{}:{}->{}", process, source, target);
    let audit = |entity_type, key: &str| {
        AuditLogEntry::new(AuditAction::Create, entity_type, key, "test", valid_from)
            .with_ingestion(ingestion_id.clone())
    };
    let process = Process {
        urn: proc_urn(process),
        name: process.to_string(),
        process_type: "job".to_string(),
        source_system: None,
        job_id: None,
        job_name: None,
        definition: None,
        created_at: valid_from,
        updated_at: valid_from,
    };
    let edge = NewEdge {
        source_urn: urn(source),
        process_urn: process.urn.clone(),
        target_urn: urn(target),
        relationship_type: DEFAULT_RELATIONSHIP_TYPE.to_string(),
        valid_from,
        ingestion_id: ingestion_id.clone(),
        metadata: None,
    };
    let batch = GraphBatch {
        ingestion_id: ingestion_id.clone(),
        process: ProcessWrite {
            audit: audit(EntityType::Process, &process.urn),
            process,
        },
        datasets: [source, target]
            .iter()
            .map(|name| {
                let urn = urn(name);
                (Dataset::minimal(&urn, valid_from), audit(EntityType::Dataset, &urn))
            })
            .collect(),
        edges: vec![(edge.clone(), audit(EntityType::LineageEdge, &edge.audit_key()))],
    };
    store.commit_graph(batch).await.unwrap().remove(0)
}

#[tokio::test]
async fn test_depth_zero_is_empty() {
    let (_, ingest_engine, traversal) = setup();
    ingest(&ingest_engine, "p1", "a", "b").await;

    let projection = traversal.get_downstream(&urn("a"), 0, None).await.unwrap();
    assert!(projection.is_empty());
    assert!(projection.datasets.is_empty());
    assert_eq!(projection.depth, 0);
}

#[tokio::test]
async fn test_unknown_root_is_empty() {
    let (_, _, traversal) = setup();
    let projection = traversal.get_upstream(&urn("ghost"), 3, None).await.unwrap();
    assert!(projection.is_empty());
    assert_eq!(projection.total_datasets, 0);
}

#[tokio::test]
async fn test_chain_respects_depth() {
    let (_, ingest_engine, traversal) = setup();
    ingest(&ingest_engine, "p1", "a", "b").await;
    ingest(&ingest_engine, "p2", "b", "c").await;
    ingest(&ingest_engine, "p3", "c", "d").await;

    let two = traversal.get_downstream(&urn("a"), 2, None).await.unwrap();
    let targets: Vec<_> = two.edges.iter().map(|e| e.edge.target_urn.clone()).collect();
    assert_eq!(targets, vec![urn("b"), urn("c")]);
    assert_eq!(two.total_datasets, 3);
    assert_eq!(two.total_processes, 2);

    let upstream = traversal.get_upstream(&urn("d"), 5, None).await.unwrap();
    assert_eq!(upstream.edges.len(), 3);
    assert_eq!(
        upstream.edges.iter().map(|e| e.depth).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(upstream.edges[2].edge.source_urn, urn("a"));
}

#[tokio::test]
async fn test_depth_is_clamped_to_ceiling() {
    let (_, ingest_engine, traversal) = setup();
    let names: Vec<String> = (0..8).map(|i| format!("n{}", i)).collect();
    for (i, pair) in names.windows(2).enumerate() {
        ingest(&ingest_engine, &format!("p{}", i), &pair[0], &pair[1]).await;
    }

    let projection = traversal.get_downstream(&urn("n0"), 50, None).await.unwrap();
    assert_eq!(projection.depth, MAX_TRAVERSAL_DEPTH);
    assert_eq!(projection.edges.len(), MAX_TRAVERSAL_DEPTH as usize);

    let shallow = TraversalEngine::new(traversal_store(&ingest_engine)).with_max_depth(2);
    let projection = shallow.get_downstream(&urn("n0"), 50, None).await.unwrap();
    assert_eq!(projection.edges.len(), 2);
}

fn traversal_store(engine: &IngestionEngine<MemoryStore>) -> Arc<MemoryStore> {
    engine.store().clone()
}

#[tokio::test]
async fn test_cycle_terminates() {
    let (_, ingest_engine, traversal) = setup();
    ingest(&ingest_engine, "p1", "a", "b").await;
    ingest(&ingest_engine, "p2", "b", "a").await;

    let projection = traversal.get_downstream(&urn("a"), 5, None).await.unwrap();
    assert_eq!(projection.edges.len(), 2);
    assert_eq!(projection.total_datasets, 2);

    let urns: Vec<_> = projection.datasets.iter().map(|d| d.urn.clone()).collect();
    assert_eq!(urns, vec![urn("a"), urn("b")]);
}

#[tokio::test]
async fn test_diamond_visits_each_node_once() {
    let (_, ingest_engine, traversal) = setup();
    ingest(&ingest_engine, "p1", "a", "b").await;
    ingest(&ingest_engine, "p2", "a", "c").await;
    ingest(&ingest_engine, "p3", "b", "d").await;
    ingest(&ingest_engine, "p4", "c", "d").await;
    ingest(&ingest_engine, "p5", "d", "e").await;

    let projection = traversal.get_downstream(&urn("a"), 5, None).await.unwrap();
    // both edges into d are reported, d is expanded once
    assert_eq!(projection.edges.len(), 5);
    let ids: HashSet<i64> = projection.edges.iter().map(|e| e.edge.id).collect();
    assert_eq!(ids.len(), 5);
    let into_e: Vec<_> = projection
        .edges
        .iter()
        .filter(|e| e.edge.target_urn == urn("e"))
        .collect();
    assert_eq!(into_e.len(), 1);
    assert_eq!(into_e[0].depth, 3);
    assert_eq!(projection.total_processes, 5);
}

#[tokio::test]
async fn test_point_in_time_queries() {
    let store = Arc::new(MemoryStore::new());
    let traversal = TraversalEngine::new(store.clone()).with_cache(None);

    let now = Utc::now();
    let three_days_ago = now - Duration::days(3);
    let two_days_ago = now - Duration::days(2);
    let yesterday = now - Duration::days(1);

    seed_edge(&store, "old", "a", "b", three_days_ago).await;
    seed_edge(&store, "live", "a", "c", three_days_ago).await;
    let closed = store
        .close_active_edges(&proc_urn("old"), yesterday, "test")
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);

    let current = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    let targets: Vec<_> = current.edges.iter().map(|e| e.edge.target_urn.clone()).collect();
    assert_eq!(targets, vec![urn("c")]);

    let then = traversal
        .get_downstream(&urn("a"), 1, Some(two_days_ago))
        .await
        .unwrap();
    assert_eq!(then.edges.len(), 2);
    assert_eq!(then.as_of, Some(two_days_ago));

    let before = traversal
        .get_downstream(&urn("a"), 1, Some(now - Duration::days(4)))
        .await
        .unwrap();
    assert!(before.is_empty());
}

#[tokio::test]
async fn test_cache_serves_stale_until_bypassed() {
    let (_, ingest_engine, traversal) = setup();
    ingest(&ingest_engine, "p1", "a", "b").await;

    let first = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    assert_eq!(first.edges.len(), 1);

    ingest(&ingest_engine, "p2", "a", "c").await;

    let cached = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    assert_eq!(cached, first);

    let fresh = traversal
        .traverse(TraversalRequest::downstream(urn("a"), 1).bypass_cache())
        .await
        .unwrap();
    assert_eq!(fresh.edges.len(), 2);

    let stats = traversal.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);

    traversal.clear_cache();
    let after_clear = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    assert_eq!(after_clear.edges.len(), 2);
}

#[tokio::test]
async fn test_depths_are_cached_separately() {
    let (_, ingest_engine, _) = setup();
    let traversal = TraversalEngine::new(ingest_engine.store().clone())
        .with_cache(Some(TraversalCache::new(8, std::time::Duration::from_secs(60))));
    ingest(&ingest_engine, "p1", "a", "b").await;
    ingest(&ingest_engine, "p2", "b", "c").await;

    let one = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    let two = traversal.get_downstream(&urn("a"), 2, None).await.unwrap();
    assert_eq!(one.edges.len(), 1);
    assert_eq!(two.edges.len(), 2);
    assert_eq!(traversal.cache_stats().entries, 2);
}

#[tokio::test]
async fn test_column_lineage_and_audit_trail() {
    let (_, ingest_engine, traversal) = setup();
    ingest_engine
        .ingest(
            IngestRequest::new(
                ProcessDescriptor::new(proc_urn("p1")),
                vec![urn("a")],
                vec![urn("b")],
            )
            .with_column_mappings(vec![tributary::sql::lineage::ColumnMapping::pass_through(
                "x", "y",
            )]),
        )
        .await
        .unwrap();

    let projection = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    let edge = &projection.edges[0].edge;
    let columns = traversal.column_lineage(edge.id).await.unwrap();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].source_column, "x");
    assert_eq!(columns[0].target_column, "y");

    let trail = traversal.audit_trail(&edge.audit_key()).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].entity_type, EntityType::LineageEdge);
}

#[tokio::test]
async fn test_upstream_and_downstream_are_symmetric() {
    let (_, ingest_engine, traversal) = setup();
    ingest(&ingest_engine, "p1", "a", "b").await;

    let down = traversal.get_downstream(&urn("a"), 1, None).await.unwrap();
    let up = traversal.get_upstream(&urn("b"), 1, None).await.unwrap();
    assert_eq!(down.edges[0].edge, up.edges[0].edge);
    assert_eq!(up.direction, Direction::Upstream);
}
