//! Amazon Redshift dialect.
//!
//! Redshift stored procedures are PL/pgSQL, so procedure patterns are shared
//! with PostgreSQL; the grammar is sqlparser's Redshift dialect.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::RedshiftSqlDialect;

use super::helpers;
use super::postgres::{PLPGSQL_CALLS, PLPGSQL_DYNAMIC_SQL};
use super::SqlDialect;

static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| helpers::statement_regex(helpers::SEMICOLON_TERMINATOR));

/// Amazon Redshift dialect.
#[derive(Debug, Clone, Copy)]
pub struct Redshift;

impl SqlDialect for Redshift {
    fn name(&self) -> &'static str {
        "redshift"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(RedshiftSqlDialect {})
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
