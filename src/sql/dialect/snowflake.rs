//! Snowflake dialect.
//!
//! Snowflake Scripting uses `EXECUTE IMMEDIATE :v_sql` (bind-style sigil
//! optional); JavaScript procedures pass text through
//! `snowflake.createStatement({sqlText: v_sql})`.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::SnowflakeDialect;

use super::helpers;
use super::SqlDialect;

static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| helpers::statement_regex(helpers::SEMICOLON_TERMINATOR));

static DYNAMIC_SQL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let exec_immediate = helpers::execute_immediate(":?");
    helpers::compile(&[
        exec_immediate.as_str(),
        r"(?i)\bsqlText\s*:\s*(?:'(?P<lit>(?:[^']|'')*)'|(?P<var>[A-Za-z_]\w*))",
    ])
});

static CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let call = helpers::call_statement();
    helpers::compile(&[call.as_str()])
});

/// Snowflake dialect.
#[derive(Debug, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(SnowflakeDialect {})
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
