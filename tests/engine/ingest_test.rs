use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tributary::ingest::{
    IngestError, IngestRequest, IngestStatus, IngestionEngine, ProcessDescriptor,
};
use tributary::model::{
    AuditAction, AuditLogEntry, ColumnLineage, Dataset, Direction, LineageEdge, NewColumnLineage,
    Process, TemporalFilter,
};
use tributary::sql::lineage::ColumnMapping;
use tributary::store::{
    AttachReport, FailurePoint, GraphBatch, LineageStore, MemoryStore, StoreError, StoreResult,
};

const JOB: &str = "urn:process:sql:job1";
const X: &str = "urn:dataset:postgres:x";
const Y: &str = "urn:dataset:postgres:y";

fn request(inputs: &[&str], outputs: &[&str]) -> IngestRequest {
    IngestRequest::new(
        ProcessDescriptor::new(JOB),
        inputs.iter().map(|s| s.to_string()).collect(),
        outputs.iter().map(|s| s.to_string()).collect(),
    )
}

fn engine() -> (Arc<MemoryStore>, IngestionEngine<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), IngestionEngine::new(store))
}

async fn current_downstream(store: &MemoryStore, urn: &str) -> Vec<LineageEdge> {
    store
        .edges_for(urn, Direction::Downstream, TemporalFilter::Current(Utc::now()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_repeat_ingestion_is_skipped() {
    let (store, engine) = engine();

    let first = engine.ingest(request(&[X], &[Y])).await.unwrap();
    assert_eq!(first.status, IngestStatus::Success);
    assert_eq!(first.edges_created, 1);

    let second = engine.ingest(request(&[X], &[Y])).await.unwrap();
    assert_eq!(second.status, IngestStatus::Skipped);
    assert_eq!(second.ingestion_id, first.ingestion_id);
    assert_eq!(second.edges_created, 1);

    assert_eq!(store.edge_count().await, 1);
}

#[tokio::test]
async fn test_derived_id_ignores_dataset_order() {
    let (store, engine) = engine();
    let a = engine.ingest(request(&[X, "urn:dataset:postgres:z"], &[Y])).await.unwrap();
    let b = engine.ingest(request(&["urn:dataset:postgres:z", X], &[Y])).await.unwrap();
    assert_eq!(a.ingestion_id, b.ingestion_id);
    assert_eq!(b.status, IngestStatus::Skipped);
    assert_eq!(store.edge_count().await, 2);
}

#[tokio::test]
async fn test_distinct_ids_create_distinct_edges() {
    let (store, engine) = engine();

    let a = engine
        .ingest(request(&[X], &[Y]).with_ingestion_id("a"))
        .await
        .unwrap();
    let b = engine
        .ingest(request(&[X], &[Y]).with_ingestion_id("b"))
        .await
        .unwrap();

    assert_eq!(a.status, IngestStatus::Success);
    assert_eq!(b.status, IngestStatus::Success);
    assert_eq!(current_downstream(&store, X).await.len(), 2);
}

#[tokio::test]
async fn test_column_mappings_attach_to_every_edge() {
    let (store, engine) = engine();
    let mappings = vec![
        ColumnMapping::pass_through("id", "id"),
        ColumnMapping::aggregate("amount", "total", "SUM(amount)"),
    ];

    let outcome = engine
        .ingest(request(&[X, "urn:dataset:postgres:z"], &[Y]).with_column_mappings(mappings))
        .await
        .unwrap();

    assert_eq!(outcome.edges_created, 2);
    assert_eq!(outcome.columns_ingested, 4);
    assert!(outcome.warnings.is_empty());

    for edge in current_downstream(&store, X).await {
        let columns: Vec<ColumnLineage> = store.column_lineage(edge.id).await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].transformation_type, "aggregate");
        assert_eq!(columns[1].transformation_expression.as_deref(), Some("SUM(amount)"));
    }
}

#[tokio::test]
async fn test_datasets_created_once() {
    let (store, engine) = engine();

    engine.ingest(request(&[X], &[Y])).await.unwrap();
    engine
        .ingest(request(&[Y], &["urn:dataset:postgres:w"]))
        .await
        .unwrap();

    let audit = store.audit_log(Y).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Create);

    let dataset = store.get_dataset(Y).await.unwrap().unwrap();
    assert_eq!(dataset.name, "y");
    assert_eq!(dataset.dataset_type, "postgres");
}

#[tokio::test]
async fn test_process_upsert_records_before_and_after() {
    let (store, engine) = engine();

    engine.ingest(request(&[X], &[Y])).await.unwrap();
    let created = store.get_process(JOB).await.unwrap().unwrap();
    assert_eq!(created.name, "job1");

    let renamed = IngestRequest::new(
        ProcessDescriptor::new(JOB).with_name("Nightly load"),
        vec![X.to_string()],
        vec!["urn:dataset:postgres:w".to_string()],
    );
    engine.ingest(renamed).await.unwrap();

    let updated = store.get_process(JOB).await.unwrap().unwrap();
    assert_eq!(updated.name, "Nightly load");
    assert_eq!(updated.created_at, created.created_at);

    let audit = store.audit_log(JOB).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].action, AuditAction::Create);
    assert!(audit[0].before.is_none());
    assert_eq!(audit[1].action, AuditAction::Update);
    assert_eq!(audit[1].before.as_ref().unwrap()["name"], "job1");
    assert_eq!(audit[1].after.as_ref().unwrap()["name"], "Nightly load");
}

#[tokio::test]
async fn test_bare_descriptor_keeps_stored_process_fields() {
    let (store, engine) = engine();

    let described = IngestRequest::new(
        ProcessDescriptor::new(JOB)
            .with_name("Load y")
            .with_process_type("sql")
            .with_source_system("dbt")
            .with_job("42", "nightly")
            .with_definition(serde_json::json!({"sql": "INSERT INTO y SELECT * FROM x"})),
        vec![X.to_string()],
        vec![Y.to_string()],
    );
    engine.ingest(described).await.unwrap();
    engine
        .ingest(request(&[X], &["urn:dataset:postgres:w"]))
        .await
        .unwrap();

    let process = store.get_process(JOB).await.unwrap().unwrap();
    assert_eq!(process.name, "Load y");
    assert_eq!(process.process_type, "sql");
    assert_eq!(process.source_system.as_deref(), Some("dbt"));
    assert_eq!(process.job_id.as_deref(), Some("42"));
    assert_eq!(process.job_name.as_deref(), Some("nightly"));
    assert_eq!(
        process.definition,
        Some(serde_json::json!({"sql": "INSERT INTO y SELECT * FROM x"}))
    );
    assert!(process.updated_at >= process.created_at);
}

#[tokio::test]
async fn test_explicit_process_type_replaces_stored_type() {
    let (store, engine) = engine();

    engine.ingest(request(&[X], &[Y])).await.unwrap();
    assert_eq!(store.get_process(JOB).await.unwrap().unwrap().process_type, "job");

    let retyped = IngestRequest::new(
        ProcessDescriptor::new(JOB).with_process_type("stored_procedure"),
        vec![X.to_string()],
        vec!["urn:dataset:postgres:w".to_string()],
    );
    engine.ingest(retyped).await.unwrap();
    assert_eq!(
        store.get_process(JOB).await.unwrap().unwrap().process_type,
        "stored_procedure"
    );
}

#[tokio::test]
async fn test_actor_is_recorded() {
    let (store, engine) = engine();
    let outcome = engine
        .ingest(request(&[X], &[Y]).with_actor("airflow"))
        .await
        .unwrap();

    let audit = store.audit_log(X).await.unwrap();
    assert_eq!(audit[0].actor, "airflow");
    assert_eq!(audit[0].ingestion_id.as_deref(), Some(outcome.ingestion_id.as_str()));
}

#[tokio::test]
async fn test_invalid_requests_write_nothing() {
    let (store, engine) = engine();

    let empty_outputs = engine.ingest(request(&[X], &[])).await;
    assert!(matches!(empty_outputs, Err(IngestError::InvalidRequest(_))));

    let blank_input = engine.ingest(request(&["  "], &[Y])).await;
    assert!(matches!(blank_input, Err(IngestError::InvalidRequest(_))));

    assert_eq!(store.edge_count().await, 0);
    assert_eq!(store.audit_count().await, 0);
}

#[tokio::test]
async fn test_phase_one_failure_leaves_no_state() {
    let (store, engine) = engine();
    store.fail_next(FailurePoint::CommitGraph).await;

    let result = engine.ingest(request(&[X], &[Y])).await;
    assert!(matches!(
        result,
        Err(IngestError::Store(StoreError::Injected(FailurePoint::CommitGraph)))
    ));
    assert_eq!(store.edge_count().await, 0);
    assert_eq!(store.audit_count().await, 0);
    assert!(store.get_process(JOB).await.unwrap().is_none());

    // the failure is one-shot
    let retry = engine.ingest(request(&[X], &[Y])).await.unwrap();
    assert_eq!(retry.status, IngestStatus::Success);
}

#[tokio::test]
async fn test_phase_two_failure_keeps_phase_one() {
    let (store, engine) = engine();
    store.fail_next(FailurePoint::AttachColumnLineage).await;

    let req = request(&[X], &[Y])
        .with_ingestion_id("run-7")
        .with_column_mappings(vec![ColumnMapping::pass_through("id", "id")]);

    let result = engine.ingest(req.clone()).await;
    assert!(matches!(
        result,
        Err(IngestError::Store(StoreError::Injected(FailurePoint::AttachColumnLineage)))
    ));

    let edges = current_downstream(&store, X).await;
    assert_eq!(edges.len(), 1);
    assert!(store.column_lineage(edges[0].id).await.unwrap().is_empty());

    // phase one is committed, so a retry with the same id is a no-op
    let retry = engine.ingest(req).await.unwrap();
    assert_eq!(retry.status, IngestStatus::Skipped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_ingestions() {
    let (store, engine) = engine();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ingest(request(&[X], &[Y])).await })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        if outcome.status == IngestStatus::Success {
            successes += 1;
        } else {
            assert_eq!(outcome.edges_created, 1);
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(store.edge_count().await, 1);
}

#[tokio::test]
async fn test_retire_edges() {
    let (store, engine) = engine();
    engine.ingest(request(&[X], &[Y])).await.unwrap();
    let valid_from = current_downstream(&store, X).await[0].valid_from;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let closed = engine.retire_edges(JOB, None, Some("ops")).await.unwrap();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].valid_to.is_some());
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(current_downstream(&store, X).await.is_empty());
    let then = store
        .edges_for(X, Direction::Downstream, TemporalFilter::AsOf(valid_from))
        .await
        .unwrap();
    assert_eq!(then.len(), 1);

    let audit = store.audit_log(&closed[0].audit_key()).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[1].action, AuditAction::Update);
    assert_eq!(audit[1].actor, "ops");

    // nothing left to close
    assert!(engine.retire_edges(JOB, None, None).await.unwrap().is_empty());
}

/// Delegates to a [`MemoryStore`] after a fixed delay on every read.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl LineageStore for SlowStore {
    async fn get_dataset(&self, urn: &str) -> StoreResult<Option<Dataset>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_dataset(urn).await
    }

    async fn get_process(&self, urn: &str) -> StoreResult<Option<Process>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_process(urn).await
    }

    async fn count_edges_for_ingestion(&self, ingestion_id: &str) -> StoreResult<usize> {
        tokio::time::sleep(self.delay).await;
        self.inner.count_edges_for_ingestion(ingestion_id).await
    }

    async fn edges_for(
        &self,
        urn: &str,
        direction: Direction,
        filter: TemporalFilter,
    ) -> StoreResult<Vec<LineageEdge>> {
        tokio::time::sleep(self.delay).await;
        self.inner.edges_for(urn, direction, filter).await
    }

    async fn column_lineage(&self, edge_id: i64) -> StoreResult<Vec<ColumnLineage>> {
        self.inner.column_lineage(edge_id).await
    }

    async fn commit_graph(&self, batch: GraphBatch) -> StoreResult<Vec<LineageEdge>> {
        self.inner.commit_graph(batch).await
    }

    async fn attach_column_lineage(
        &self,
        rows: Vec<NewColumnLineage>,
    ) -> StoreResult<AttachReport> {
        self.inner.attach_column_lineage(rows).await
    }

    async fn close_active_edges(
        &self,
        process_urn: &str,
        valid_to: DateTime<Utc>,
        actor: &str,
    ) -> StoreResult<Vec<LineageEdge>> {
        self.inner.close_active_edges(process_urn, valid_to, actor).await
    }

    async fn audit_log(&self, entity_urn: &str) -> StoreResult<Vec<AuditLogEntry>> {
        self.inner.audit_log(entity_urn).await
    }
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(200),
    });
    let engine = IngestionEngine::new(store.clone()).with_timeout(Duration::from_millis(10));

    let result = engine.ingest(request(&[X], &[Y])).await;
    match result {
        Err(IngestError::Timeout { operation, after }) => {
            assert_eq!(operation, "count_edges_for_ingestion");
            assert_eq!(after, Duration::from_millis(10));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(store.inner.edge_count().await, 0);
}
