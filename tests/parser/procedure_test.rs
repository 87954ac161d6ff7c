use tributary::procedure::{
    parse_procedure, ProcedureLineageParser, Resolution, PARTIAL_CONFIDENCE_CAP,
};
use tributary::sql::lineage::TransformationType;
use tributary::sql::Dialect;

fn tables(set: &std::collections::BTreeSet<String>) -> Vec<&str> {
    set.iter().map(String::as_str).collect()
}

#[test]
fn test_tsql_procedure() {
    let body = r#"
CREATE PROCEDURE dbo.usp_load_orders AS
BEGIN
    DECLARE @sql NVARCHAR(MAX) = N'DELETE FROM dbo.stage_orders';

    INSERT INTO dbo.orders (id, amount)
    SELECT id, amount FROM dbo.stage_orders;

    EXEC(@sql);
    EXEC etl.log_run @name = 'orders';
END
"#;
    let fact = parse_procedure(body, Dialect::TSql, None);

    assert_eq!(fact.error, None);
    assert_eq!(fact.procedure_name.as_deref(), Some("dbo.usp_load_orders"));
    assert_eq!(tables(&fact.all_source_tables), vec!["dbo.stage_orders"]);
    assert_eq!(
        tables(&fact.all_target_tables),
        vec!["dbo.orders", "dbo.stage_orders"]
    );
    assert_eq!(fact.dynamic_sql_lineage.len(), 1);
    assert_eq!(fact.dynamic_sql_lineage[0].resolution, Resolution::Resolved);
    assert_eq!(fact.dynamic_sql_lineage[0].variable.as_deref(), Some("@sql"));
    assert_eq!(fact.procedure_dependencies, vec!["etl.log_run"]);
    assert!((0.0..=1.0).contains(&fact.confidence_score));
}

#[test]
fn test_tsql_exec_variable_without_parentheses() {
    let body = r#"
CREATE PROCEDURE dbo.usp_archive AS
BEGIN
    DECLARE @sql NVARCHAR(MAX) = N'INSERT INTO dbo.archive (id) SELECT id FROM dbo.orders';
    EXEC @sql
    EXEC @rc = etl.log_run
END
"#;
    let fact = parse_procedure(body, Dialect::TSql, None);

    assert_eq!(fact.dynamic_sql_lineage.len(), 1);
    assert_eq!(fact.dynamic_sql_lineage[0].variable.as_deref(), Some("@sql"));
    assert_eq!(fact.dynamic_sql_lineage[0].resolution, Resolution::Resolved);
    assert_eq!(tables(&fact.all_target_tables), vec!["dbo.archive"]);
    assert_eq!(tables(&fact.all_source_tables), vec!["dbo.orders"]);
    assert_eq!(fact.procedure_dependencies, vec!["etl.log_run"]);
}

#[test]
fn test_plpgsql_function_with_opaque_dynamic_sql() {
    let body = r#"
CREATE OR REPLACE FUNCTION mart.refresh() RETURNS void AS $$
BEGIN
  INSERT INTO mart.daily (order_date, total)
  SELECT order_date, SUM(amount) FROM sales.orders GROUP BY order_date;
  EXECUTE format('ANALYZE %I', 'mart.daily');
  PERFORM audit.log_run('refresh');
END;
$$ LANGUAGE plpgsql;
"#;
    let fact = parse_procedure(body, Dialect::Postgres, None);

    assert_eq!(fact.procedure_name.as_deref(), Some("mart.refresh"));
    assert_eq!(tables(&fact.all_target_tables), vec!["mart.daily"]);
    assert_eq!(tables(&fact.all_source_tables), vec!["sales.orders"]);
    assert_eq!(fact.column_lineage.len(), 2);
    assert_eq!(
        fact.column_lineage[1].transformation_type,
        TransformationType::Aggregate
    );

    assert_eq!(fact.dynamic_sql_lineage.len(), 1);
    let dynamic = &fact.dynamic_sql_lineage[0];
    assert_eq!(dynamic.resolution, Resolution::Unresolved);
    assert!(dynamic.fact.warnings[0].contains("format"));

    assert_eq!(fact.procedure_dependencies, vec!["audit.log_run"]);
    // only static SQL contributed
    assert_eq!(fact.confidence_score, 0.8);
}

#[test]
fn test_unresolvable_dynamic_sql() {
    let body = "CREATE PROCEDURE p AS BEGIN EXECUTE IMMEDIATE v_sql; END;";
    let fact = parse_procedure(body, Dialect::Oracle, None);

    assert_eq!(fact.dynamic_sql_lineage.len(), 1);
    let dynamic = &fact.dynamic_sql_lineage[0];
    assert!(dynamic.fact.source_tables.is_empty());
    assert_eq!(dynamic.fact.target_table, None);
    assert!((0.0..=1.0).contains(&dynamic.fact.confidence_score));
    assert!((0.0..=1.0).contains(&fact.confidence_score));
}

#[test]
fn test_partial_dynamic_sql_is_capped() {
    let body = r#"
BEGIN
  v_sql := 'INSERT INTO audit.snapshots SELECT * FROM ' || p_source;
  EXECUTE IMMEDIATE v_sql;
END;
"#;
    let fact = parse_procedure(body, Dialect::Oracle, Some("snapshot"));

    let dynamic = &fact.dynamic_sql_lineage[0];
    assert_eq!(dynamic.resolution, Resolution::Partial);
    assert_eq!(dynamic.fact.target_table.as_deref(), Some("audit.snapshots"));
    assert!(dynamic.fact.confidence_score <= PARTIAL_CONFIDENCE_CAP);
    assert_eq!(tables(&fact.all_target_tables), vec!["audit.snapshots"]);
}

#[test]
fn test_comments_and_literals_hide_statements() {
    let body = r#"
BEGIN
  -- INSERT INTO commented.out SELECT * FROM nowhere;
  /* DELETE FROM also.hidden; */
  v_note := 'UPDATE in_literal SET x = 1';
  DELETE FROM real.target;
END;
"#;
    let fact = parse_procedure(body, Dialect::Oracle, Some("p"));
    assert_eq!(tables(&fact.all_target_tables), vec!["real.target"]);
    assert!(fact.all_source_tables.is_empty());
}

#[test]
fn test_mysql_hash_comments() {
    let body = "# INSERT INTO hidden SELECT 1;\nINSERT INTO visible SELECT * FROM src;";
    let fact = parse_procedure(body, Dialect::MySql, Some("p"));
    assert_eq!(tables(&fact.all_target_tables), vec!["visible"]);
}

#[test]
fn test_scan_errors_are_partial_results() {
    let fact = parse_procedure("BEGIN v := 'never closed; END;", Dialect::Oracle, Some("p"));
    assert!(fact.error.is_some());
    assert_eq!(fact.confidence_score, 0.3);
    assert!(fact.static_sql_lineage.is_empty());
}

#[test]
fn test_size_limit_from_settings() {
    let settings = tributary::config::ParserSettings {
        max_procedure_bytes: 10,
        ..Default::default()
    };
    let parser = ProcedureLineageParser::from_settings(&settings);
    let fact = parser.parse("INSERT INTO t SELECT * FROM s;", Dialect::Ansi, None);
    assert!(fact.error.unwrap().contains("limit is 10"));
}
