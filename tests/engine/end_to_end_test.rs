use std::sync::Arc;

use tributary::ingest::{IngestRequest, IngestStatus, IngestionEngine, ProcessDescriptor};
use tributary::model::{dataset_urn, Direction};
use tributary::procedure::parse_procedure;
use tributary::sql::{parse_sql, Dialect};
use tributary::store::{LineageStore, MemoryStore, SqliteStore};
use tributary::traversal::TraversalEngine;

async fn ingest_and_walk<S: LineageStore>(store: Arc<S>) {
    let ingest = IngestionEngine::new(store.clone());
    let traversal = TraversalEngine::new(store);

    let outcome = ingest
        .ingest(IngestRequest::new(
            ProcessDescriptor::new("urn:process:sql:job1"),
            vec!["urn:dataset:x".to_string()],
            vec!["urn:dataset:y".to_string()],
        ))
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestStatus::Success);
    assert_eq!(outcome.edges_created, 1);

    let projection = traversal
        .get_downstream("urn:dataset:x", 1, None)
        .await
        .unwrap();
    assert_eq!(projection.edges.len(), 1);
    let edge = &projection.edges[0];
    assert_eq!(edge.depth, 1);
    assert_eq!(edge.edge.source_urn, "urn:dataset:x");
    assert_eq!(edge.edge.process_urn, "urn:process:sql:job1");
    assert_eq!(edge.edge.target_urn, "urn:dataset:y");
    assert_eq!(edge.edge.relationship_type, "transformation");
    assert!(edge.edge.valid_to.is_none());
    assert_eq!(projection.total_datasets, 2);
    assert_eq!(projection.total_processes, 1);
    assert_eq!(projection.processes[0].name, "job1");
}

#[tokio::test]
async fn test_ingest_then_traverse_in_memory() {
    ingest_and_walk(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_ingest_then_traverse_sqlite() {
    ingest_and_walk(Arc::new(SqliteStore::open_in_memory().unwrap())).await;
}

#[tokio::test]
async fn test_parsed_sql_flows_into_graph() {
    let store = Arc::new(MemoryStore::new());
    let ingest = IngestionEngine::new(store.clone());
    let traversal = TraversalEngine::new(store);

    let fact = parse_sql(
        "INSERT INTO mart.customer_totals (customer_id, total) \
         SELECT o.customer_id, SUM(o.amount) FROM sales.orders o GROUP BY o.customer_id",
        Dialect::Postgres,
    );
    let request = IngestRequest::from_lineage_fact(
        ProcessDescriptor::new("urn:process:dbt:customer_totals").with_process_type("sql"),
        &fact,
        "postgres",
    );
    let outcome = ingest.ingest(request).await.unwrap();
    assert_eq!(outcome.edges_created, 1);
    assert_eq!(outcome.columns_ingested, 2);

    let target = dataset_urn("postgres", "mart.customer_totals");
    let upstream = traversal.get_upstream(&target, 1, None).await.unwrap();
    assert_eq!(upstream.direction, Direction::Upstream);
    assert_eq!(
        upstream.edges[0].edge.source_urn,
        dataset_urn("postgres", "sales.orders")
    );

    let columns = traversal
        .column_lineage(upstream.edges[0].edge.id)
        .await
        .unwrap();
    let pairs: Vec<_> = columns
        .iter()
        .map(|c| (c.source_column.as_str(), c.target_column.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![("o.customer_id", "customer_id"), ("SUM(o.amount)", "total")]
    );
    assert_eq!(columns[0].transformation_type, "pass_through");
    assert_eq!(columns[1].transformation_type, "aggregate");
    assert_eq!(
        columns[1].transformation_expression.as_deref(),
        Some("SUM(o.amount)")
    );
}

#[tokio::test]
async fn test_parsed_procedure_flows_into_graph() {
    let store = Arc::new(MemoryStore::new());
    let ingest = IngestionEngine::new(store.clone());
    let traversal = TraversalEngine::new(store);

    let body = r#"
CREATE OR REPLACE PROCEDURE etl.refresh_sales AS
BEGIN
  DELETE FROM mart.sales_daily;
  INSERT INTO mart.sales_daily (sale_date, amount)
  SELECT sale_date, amount FROM stage.sales;
  v_sql := 'INSERT INTO mart.sales_archive SELECT * FROM mart.sales_daily';
  EXECUTE IMMEDIATE v_sql;
END;
"#;
    let fact = parse_procedure(body, Dialect::Oracle, None);
    assert_eq!(fact.procedure_name.as_deref(), Some("etl.refresh_sales"));

    let request = IngestRequest::from_procedure_fact(
        ProcessDescriptor::new("urn:process:oracle:etl.refresh_sales")
            .with_process_type("stored_procedure"),
        &fact,
        "oracle",
    );
    // sources {stage.sales, mart.sales_daily} x targets {mart.sales_daily, mart.sales_archive}
    let outcome = ingest.ingest(request).await.unwrap();
    assert_eq!(outcome.edges_created, 4);

    let downstream = traversal
        .get_downstream(&dataset_urn("oracle", "stage.sales"), 2, None)
        .await
        .unwrap();
    let reached: Vec<_> = downstream.datasets.iter().map(|d| d.urn.clone()).collect();
    assert_eq!(
        reached,
        vec![
            dataset_urn("oracle", "mart.sales_archive"),
            dataset_urn("oracle", "mart.sales_daily"),
            dataset_urn("oracle", "stage.sales"),
        ]
    );
}

#[tokio::test]
async fn test_sqlite_graph_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lineage.db");

    let request = IngestRequest::new(
        ProcessDescriptor::new("urn:process:sql:job1"),
        vec!["urn:dataset:x".to_string()],
        vec!["urn:dataset:y".to_string()],
    );

    let first = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        IngestionEngine::new(store).ingest(request.clone()).await.unwrap()
    };
    assert_eq!(first.status, IngestStatus::Success);

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let again = IngestionEngine::new(store.clone())
        .ingest(request)
        .await
        .unwrap();
    assert_eq!(again.status, IngestStatus::Skipped);
    assert_eq!(again.ingestion_id, first.ingestion_id);

    let projection = TraversalEngine::new(store)
        .get_upstream("urn:dataset:y", 3, None)
        .await
        .unwrap();
    assert_eq!(projection.edges.len(), 1);
}
