use chrono::{DateTime, Duration, Utc};

use tributary::model::{
    AuditAction, AuditLogEntry, Dataset, Direction, EntityType, NewColumnLineage, NewEdge,
    Process, TemporalFilter, DEFAULT_RELATIONSHIP_TYPE,
};
use tributary::store::{GraphBatch, LineageStore, ProcessWrite, SqliteStore, StoreError};

const PROCESS: &str = "urn:process:test:load";

fn process(name: &str, at: DateTime<Utc>) -> Process {
    Process {
        urn: PROCESS.to_string(),
        name: name.to_string(),
        process_type: "job".to_string(),
        source_system: Some("cron".to_string()),
        job_id: None,
        job_name: None,
        definition: Some(serde_json::json!({ "sql": "INSERT INTO b SELECT * FROM a" })),
        created_at: at,
        updated_at: at,
    }
}

fn batch(ingestion_id: &str, pairs: &[(&str, &str)], at: DateTime<Utc>) -> GraphBatch {
    let audit = |entity_type, key: &str| {
        AuditLogEntry::new(AuditAction::Create, entity_type, key, "test", at)
            .with_ingestion(ingestion_id)
    };

    let mut datasets = Vec::new();
    let mut edges = Vec::new();
    for (source, target) in pairs {
        for urn in [*source, *target] {
            datasets.push((Dataset::minimal(urn, at), audit(EntityType::Dataset, urn)));
        }
        let edge = NewEdge {
            source_urn: source.to_string(),
            process_urn: PROCESS.to_string(),
            target_urn: target.to_string(),
            relationship_type: DEFAULT_RELATIONSHIP_TYPE.to_string(),
            valid_from: at,
            ingestion_id: ingestion_id.to_string(),
            metadata: None,
        };
        let edge_audit = audit(EntityType::LineageEdge, &edge.audit_key());
        edges.push((edge, edge_audit));
    }

    GraphBatch {
        ingestion_id: ingestion_id.to_string(),
        process: ProcessWrite {
            process: process("load", at),
            audit: audit(EntityType::Process, PROCESS),
        },
        datasets,
        edges,
    }
}

#[tokio::test]
async fn test_commit_assigns_ids_and_writes_audit() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Utc::now();

    let edges = store
        .commit_graph(batch("run-1", &[("a", "b"), ("a", "c")], now))
        .await
        .unwrap();
    assert_eq!(edges.len(), 2);
    assert!(edges[0].id < edges[1].id);
    assert_eq!(store.count_edges_for_ingestion("run-1").await.unwrap(), 2);

    // "a" appears twice in the batch but is created once
    assert_eq!(store.audit_log("a").await.unwrap().len(), 1);
    assert_eq!(store.audit_log(PROCESS).await.unwrap().len(), 1);
    assert_eq!(store.audit_log(&edges[1].audit_key()).await.unwrap().len(), 1);

    let stored = store.get_process(PROCESS).await.unwrap().unwrap();
    assert_eq!(stored.source_system.as_deref(), Some("cron"));
    assert_eq!(stored.definition.unwrap()["sql"], "INSERT INTO b SELECT * FROM a");
}

#[tokio::test]
async fn test_duplicate_edge_rolls_back_batch() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Utc::now();
    store.commit_graph(batch("run-1", &[("a", "b")], now)).await.unwrap();

    // new dataset "z" comes before the duplicate edge
    let result = store
        .commit_graph(batch("run-1", &[("z", "y"), ("a", "b")], now))
        .await;
    match result {
        Err(StoreError::DuplicateEdge { ingestion_id }) => assert_eq!(ingestion_id, "run-1"),
        other => panic!("expected duplicate edge, got {:?}", other),
    }

    assert!(store.get_dataset("z").await.unwrap().is_none());
    assert_eq!(store.count_edges_for_ingestion("run-1").await.unwrap(), 1);
    assert_eq!(store.audit_log(PROCESS).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_process_upsert_keeps_created_at() {
    let store = SqliteStore::open_in_memory().unwrap();
    let earlier = Utc::now() - Duration::hours(1);
    let later = Utc::now();

    store.commit_graph(batch("run-1", &[("a", "b")], earlier)).await.unwrap();
    let mut second = batch("run-2", &[("a", "c")], later);
    second.process.process = process("renamed", later);
    second.process.process.source_system = None;
    second.process.process.definition = None;
    second.process.audit = AuditLogEntry::new(
        AuditAction::Update,
        EntityType::Process,
        PROCESS,
        "test",
        later,
    );
    store.commit_graph(second).await.unwrap();

    let stored = store.get_process(PROCESS).await.unwrap().unwrap();
    assert_eq!(stored.name, "renamed");
    assert_eq!(stored.source_system.as_deref(), Some("cron"));
    assert!(stored.definition.is_some());
    assert_eq!(stored.created_at.timestamp_micros(), earlier.timestamp_micros());
    assert_eq!(stored.updated_at.timestamp_micros(), later.timestamp_micros());

    let audit = store.audit_log(PROCESS).await.unwrap();
    assert_eq!(
        audit.iter().map(|e| e.action).collect::<Vec<_>>(),
        vec![AuditAction::Create, AuditAction::Update]
    );
}

#[tokio::test]
async fn test_column_rows_for_missing_edges_are_skipped() {
    let store = SqliteStore::open_in_memory().unwrap();
    let edges = store
        .commit_graph(batch("run-1", &[("a", "b")], Utc::now()))
        .await
        .unwrap();

    let row = |edge_id| NewColumnLineage {
        edge_id,
        source_column: "id".to_string(),
        target_column: "id".to_string(),
        transformation_type: "pass_through".to_string(),
        transformation_expression: None,
    };
    let report = store
        .attach_column_lineage(vec![row(edges[0].id), row(999), row(999)])
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.missing_edges, vec![999]);
    let columns = store.column_lineage(edges[0].id).await.unwrap();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].edge_id, edges[0].id);
}

#[tokio::test]
async fn test_close_and_point_in_time_reads() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Utc::now();
    let start = now - Duration::days(3);
    let end = now - Duration::days(1);

    store
        .commit_graph(batch("run-1", &[("a", "b")], start))
        .await
        .unwrap();
    let closed = store.close_active_edges(PROCESS, end, "ops").await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(
        closed[0].valid_to.map(|t| t.timestamp_micros()),
        Some(end.timestamp_micros())
    );

    let current = store
        .edges_for("a", Direction::Downstream, TemporalFilter::Current(now))
        .await
        .unwrap();
    assert!(current.is_empty());

    let inside = store
        .edges_for("b", Direction::Upstream, TemporalFilter::AsOf(now - Duration::days(2)))
        .await
        .unwrap();
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].source_urn, "a");

    let after = store
        .edges_for("a", Direction::Downstream, TemporalFilter::AsOf(now))
        .await
        .unwrap();
    assert!(after.is_empty());

    let audit = store.audit_log(&closed[0].audit_key()).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[1].action, AuditAction::Update);
    assert_eq!(audit[1].actor, "ops");
    assert!(audit[1].before.as_ref().unwrap()["valid_to"].is_null());
    assert!(!audit[1].after.as_ref().unwrap()["valid_to"].is_null());

    // already closed
    assert!(store
        .close_active_edges(PROCESS, now, "ops")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_open_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("lineage.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .commit_graph(batch("run-1", &[("a", "b")], Utc::now()))
            .await
            .unwrap();
    }
    assert!(path.exists());

    let reopened = SqliteStore::open(&path).unwrap();
    assert!(reopened.get_dataset("b").await.unwrap().is_some());
    assert_eq!(reopened.count_edges_for_ingestion("run-1").await.unwrap(), 1);
}
