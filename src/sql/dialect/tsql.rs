//! T-SQL (SQL Server / Azure SQL / Synapse) dialect.
//!
//! T-SQL has significant differences from ANSI when reading procedures:
//! - Statements are frequently unterminated; batches are split by `GO`
//! - `@variables`, assigned with `SET`/`SELECT`/`DECLARE ... =`
//! - Dynamic SQL via `EXEC(@sql)`, `EXEC @sql`, `EXEC sp_executesql @sql` and `N'...'` literals
//! - `EXEC proc` / `EXECUTE proc` for procedure calls
//! - String concatenation with `+`

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::MsSqlDialect;

use super::helpers;
use super::SqlDialect;

/// Without semicolons a statement also ends at a blank line, a `GO` batch
/// separator, or a control-flow keyword at the start of a line.
const TSQL_TERMINATOR: &str = r";|\n[ \t]*\n|(?m:^[ \t]*(?:GO|END|BEGIN|IF|ELSE|WHILE|RETURN|DECLARE|EXEC|EXECUTE|PRINT)\b)";

static STATEMENT: LazyLock<Regex> = LazyLock::new(|| helpers::statement_regex(TSQL_TERMINATOR));

static DYNAMIC_SQL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    helpers::compile(&[
        r"(?i)\bEXEC(?:UTE)?\s*\(\s*(?:(?P<var>@\w+)|N?'(?P<lit>(?:[^']|'')*)')\s*\)",
        r"(?i)\bsp_executesql\s+(?:(?P<var>@\w+)|N?'(?P<lit>(?:[^']|'')*)')",
        // `EXEC @sql` without parentheses; `EXEC @rc = proc` is a call.
        r"(?im)\bEXEC(?:UTE)?\s+(?P<var>@\w+)\b\s*(?:[^=\s]|$)",
    ])
});

static CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    helpers::compile(&[
        r"(?i)\bEXEC(?:UTE)?\s+(?:@\w+\s*=\s*)?(?P<name>(?:\[[^\]]+\]|[A-Za-z_][\w$#]*)(?:\.(?:\[[^\]]+\]|[A-Za-z_][\w$#]*))*)",
    ])
});

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(MsSqlDialect {})
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

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    fn select_into_creates_table(&self) -> bool {
        true
    }
}
