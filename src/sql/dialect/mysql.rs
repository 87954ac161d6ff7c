//! MySQL / MariaDB dialect.
//!
//! MySQL specifics:
//! - `#` line comments in addition to `--`
//! - Dynamic SQL through `PREPARE stmt FROM @sql` (often built with `CONCAT`)
//! - `CALL proc(...)` for procedure calls

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::dialect::MySqlDialect;

use super::helpers;
use super::SqlDialect;

static STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| helpers::statement_regex(helpers::SEMICOLON_TERMINATOR));

static DYNAMIC_SQL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    helpers::compile(&[
        r"(?i)\bPREPARE\s+\w+\s+FROM\s+(?:(?P<var>@?[A-Za-z_]\w*)|'(?P<lit>(?:[^']|'')*)')",
    ])
});

static CALLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    helpers::compile(&[
        r"(?i)\bCALL\s+(?P<name>(?:`[^`]+`|[A-Za-z_]\w*)(?:\.(?:`[^`]+`|[A-Za-z_]\w*))*)",
    ])
});

/// MySQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(MySqlDialect {})
    }

    fn line_comment_prefixes(&self) -> &'static [&'static str] {
        &["--", "#"]
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
