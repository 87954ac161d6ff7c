//! ANSI SQL dialect - generic fallback.
//!
//! Used when the source system is unknown. The grammar is sqlparser's
//! `GenericDialect`, and procedure patterns are the union of the most common
//! vendor forms (`EXECUTE IMMEDIATE`, `EXEC(@v)`, `CALL`).

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::GenericDialect;

use super::helpers;
use super::SqlDialect;

static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| helpers::statement_regex(helpers::SEMICOLON_TERMINATOR));

static DYNAMIC_SQL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let exec_immediate = helpers::execute_immediate(":?");
    helpers::compile(&[
        exec_immediate.as_str(),
        r"(?i)\bEXEC(?:UTE)?\s*\(\s*(?:(?P<var>@\w+)|N?'(?P<lit>(?:[^']|'')*)')\s*\)",
    ])
});

static CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let call = helpers::call_statement();
    helpers::compile(&[call.as_str()])
});

/// ANSI SQL dialect (generic fallback).
#[derive(Debug, Clone, Copy)]
pub struct Ansi;

impl SqlDialect for Ansi {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(GenericDialect {})
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
