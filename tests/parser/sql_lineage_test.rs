use tributary::config::ParserSettings;
use tributary::sql::lineage::{
    ColumnMapping, ExtractionMethod, QueryType, SqlLineageParser, TransformationType,
};
use tributary::sql::{parse_sql, Dialect};

#[test]
fn test_insert_select_with_structured_parser() {
    let fact = parse_sql("INSERT INTO t (a,b) SELECT x,y FROM s", Dialect::Ansi);

    assert_eq!(fact.target_table.as_deref(), Some("t"));
    assert_eq!(fact.source_tables.iter().collect::<Vec<_>>(), vec!["s"]);
    assert_eq!(
        fact.column_lineage,
        vec![
            ColumnMapping::pass_through("x", "a"),
            ColumnMapping::pass_through("y", "b"),
        ]
    );
    assert_eq!(fact.confidence_score, 0.9);
    assert_eq!(fact.extraction_method, ExtractionMethod::Structured);
}

#[test]
fn test_fact_json_shape() {
    let fact = parse_sql("INSERT INTO t (a,b) SELECT x,y FROM s", Dialect::Ansi);
    insta::assert_snapshot!(
        serde_json::to_string(&fact).unwrap(),
        @r#"{"source_tables":["s"],"target_table":"t","column_lineage":[{"source_column":"x","target_column":"a","transformation_type":"pass_through"},{"source_column":"y","target_column":"b","transformation_type":"pass_through"}],"query_type":"INSERT","confidence_score":0.9,"extraction_method":"structured"}"#
    );
}

#[test]
fn test_disabled_structured_parser_uses_fallback() {
    let settings = ParserSettings {
        structured: false,
        ..ParserSettings::default()
    };
    let parser = SqlLineageParser::from_settings(&settings);
    assert!(!parser.is_structured());

    let fact = parser.parse(
        "INSERT INTO warehouse.orders SELECT * FROM staging.orders o JOIN staging.customers c ON o.cid = c.id",
        Dialect::Postgres,
    );
    assert_eq!(fact.extraction_method, ExtractionMethod::RegexFallback);
    assert_eq!(fact.target_table.as_deref(), Some("warehouse.orders"));
    assert_eq!(
        fact.source_tables.iter().collect::<Vec<_>>(),
        vec!["staging.customers", "staging.orders"]
    );
    assert_eq!(fact.confidence_score, 0.5);
    assert!(fact.column_lineage.is_empty());
}

#[test]
fn test_unparseable_sql_degrades() {
    let fact = parse_sql("INSERT INTO t SELECT x FROM s WHERE ((", Dialect::Ansi);
    assert_eq!(fact.extraction_method, ExtractionMethod::RegexFallback);
    assert_eq!(fact.target_table.as_deref(), Some("t"));
    assert!(fact.confidence_score < 0.9);
    assert_eq!(fact.warnings.len(), 1);
}

#[test]
fn test_ctas_with_aggregate_postgres() {
    let fact = parse_sql(
        "CREATE TABLE mart.revenue AS SELECT region, SUM(amount) AS total FROM sales.orders GROUP BY region",
        Dialect::Postgres,
    );
    assert_eq!(fact.query_type, QueryType::Create);
    assert_eq!(fact.target_table.as_deref(), Some("mart.revenue"));
    assert_eq!(fact.column_lineage.len(), 2);
    assert_eq!(
        fact.column_lineage[1].transformation_type,
        TransformationType::Aggregate
    );
    assert_eq!(fact.column_lineage[1].target_column, "total");
}

#[test]
fn test_tsql_identifiers_are_unquoted() {
    let fact = parse_sql(
        "INSERT INTO [dw].[orders] ([id]) SELECT [id] FROM [stage].[orders]",
        Dialect::TSql,
    );
    assert_eq!(fact.target_table.as_deref(), Some("dw.orders"));
    assert!(fact.source_tables.contains("stage.orders"));
}

#[test]
fn test_parsing_never_fails() {
    let inputs = [
        "",
        ";;;",
        "SELECT",
        "INSERT INTO",
        "not sql at all",
        "DROP TABLE x",
        "SELECT * FROM a WHERE b = 'unterminated",
        "WITH x AS (SELECT 1) SELECT * FROM x",
    ];
    for dialect in Dialect::all() {
        for sql in inputs {
            let fact = parse_sql(sql, *dialect);
            assert!(
                (0.0..=1.0).contains(&fact.confidence_score),
                "{} / {:?}",
                dialect,
                sql
            );
        }
    }
}

#[test]
fn test_parser_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SqlLineageParser>();

    let parser = SqlLineageParser::new();
    std::thread::scope(|scope| {
        for i in 0..4 {
            let parser = &parser;
            scope.spawn(move || {
                let sql = format!("INSERT INTO t{} (a) SELECT x FROM s{}", i, i);
                let fact = parser.parse(&sql, Dialect::Ansi);
                assert_eq!(fact.target_table, Some(format!("t{}", i)));
            });
        }
    });
}
