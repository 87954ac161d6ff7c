//! DuckDB dialect.
//!
//! DuckDB has no stored procedures; macros and scripts are read with the
//! generic procedure patterns.

use regex::Regex;
use sqlparser::dialect::DuckDbDialect;

use super::ansi::Ansi;
use super::SqlDialect;

/// DuckDB dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(DuckDbDialect {})
    }

    fn statement_pattern(&self) -> &'static Regex {
        Ansi.statement_pattern()
    }

    fn dynamic_sql_patterns(&self) -> &'static [Regex] {
        Ansi.dynamic_sql_patterns()
    }

    fn call_patterns(&self) -> &'static [Regex] {
        Ansi.call_patterns()
    }
}
