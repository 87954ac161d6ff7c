//! Google BigQuery dialect.
//!
//! BigQuery scripting runs dynamic SQL with `EXECUTE IMMEDIATE` and invokes
//! procedures with `CALL dataset.proc()`.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::BigQueryDialect;

use super::helpers;
use super::SqlDialect;

static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| helpers::statement_regex(helpers::SEMICOLON_TERMINATOR));

static DYNAMIC_SQL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let exec_immediate = helpers::execute_immediate("");
    helpers::compile(&[exec_immediate.as_str()])
});

static CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let call = helpers::call_statement();
    helpers::compile(&[call.as_str()])
});

/// BigQuery dialect.
#[derive(Debug, Clone, Copy)]
pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(BigQueryDialect {})
    }

    fn statement_pattern(&self) -> &'static Regex {
        &STATEMENT
    }

    fn dynamic_sql_patterns(&self) -> &'static [Regex] {
        &DYNAMIC_SQL
    }

    fn call_patterns(&self) -> &'static [Regex] {
        &CALLS
    }
}
