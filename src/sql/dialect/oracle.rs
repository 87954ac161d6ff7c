//! Oracle (PL/SQL) dialect.
//!
//! PL/SQL specifics:
//! - `EXECUTE IMMEDIATE v_sql` / `EXECUTE IMMEDIATE '...'` for dynamic SQL
//! - `v_sql := 'SELECT ...' || v_tab;` assignments
//! - Procedure calls as bare statements (`pkg.load_orders(p_date);`) or `CALL`
//! - `$` and `#` allowed in identifiers
//!
//! sqlparser has no Oracle grammar; the generic grammar is used.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::GenericDialect;

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
    let bare = format!(
        r"(?im)^\s*(?P<name>{})\s*\([^;]*\)\s*;",
        helpers::DOTTED_IDENT
    );
    helpers::compile(&[call.as_str(), bare.as_str()])
});

/// Oracle PL/SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

impl SqlDialect for Oracle {
    fn name(&self) -> &'static str {
        "oracle"
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
