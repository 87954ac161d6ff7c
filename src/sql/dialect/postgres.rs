//! PostgreSQL (PL/pgSQL) dialect.
//!
//! PL/pgSQL specifics:
//! - `EXECUTE v_sql` runs dynamic SQL; `EXECUTE format(...)` cannot be resolved
//! - `PERFORM proc(...)` and `CALL proc(...)` invoke other routines
//! - Function bodies are dollar-quoted, so they are scanned as code

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;

use super::helpers;
use super::SqlDialect;

static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| helpers::statement_regex(helpers::SEMICOLON_TERMINATOR));

pub(super) static PLPGSQL_DYNAMIC_SQL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    helpers::compile(&[
        r"(?i)\bEXECUTE\s+(?:'(?P<lit>(?:[^']|'')*)'|(?P<call>[A-Za-z_]\w*)\s*\(|(?P<var>[A-Za-z_]\w*)\b)",
    ])
});

pub(super) static PLPGSQL_CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let call = format!(
        r"(?i)\b(?:CALL|PERFORM)\s+(?P<name>{})\s*\(",
        helpers::DOTTED_IDENT
    );
    helpers::compile(&[call.as_str()])
});

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(PostgreSqlDialect {})
    }

    fn statement_pattern(&self) -> &'static Regex {
        &STATEMENT
    }

    fn dynamic_sql_patterns(&self) -> &'static [Regex] {
        &PLPGSQL_DYNAMIC_SQL
    }

    fn call_patterns(&self) -> &'static [Regex] {
        &PLPGSQL_CALLS
    }
}
