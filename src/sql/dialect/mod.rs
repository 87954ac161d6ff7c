//! SQL dialect definitions for lineage extraction.
//!
//! This module provides a trait-based abstraction over the dialect differences
//! that matter when *reading* SQL rather than generating it:
//!
//! - Grammar: which `sqlparser` dialect drives the structured parse
//! - Comments: `--` everywhere, `#` in MySQL
//! - Statement boundaries: `;` vs T-SQL's `GO` batches and unterminated statements
//! - Dynamic SQL: `EXECUTE IMMEDIATE`, `EXEC(@sql)`, `sp_executesql`, `PREPARE ... FROM`
//! - Call dependencies: `EXEC proc`, `CALL proc`, `PERFORM proc()`, bare PL/SQL calls
//! - String concatenation: `||` vs `+`
//!
//! # Usage
//!
//! ```ignore
//! use tributary::sql::dialect::{Dialect, SqlDialect};
//!
//! let dialect: Dialect = "plsql".parse()?;
//! assert_eq!(dialect.name(), "oracle");
//! ```
//!
//! # Procedure Language Coverage
//!
//! | Dialect | Dynamic SQL | Calls | Terminator |
//! |---------|-------------|-------|------------|
//! | Oracle (PL/SQL) | `EXECUTE IMMEDIATE` | `CALL`, bare `pkg.proc(...);` | `;` |
//! | T-SQL | `EXEC(@v)`, `EXEC @v`, `sp_executesql @v` | `EXEC proc` | `;`, `GO`, blank line |
//! | Postgres / Redshift (PL/pgSQL) | `EXECUTE v` | `CALL`, `PERFORM` | `;` |
//! | MySQL | `PREPARE s FROM @v` | `CALL` | `;` |
//! | Snowflake | `EXECUTE IMMEDIATE`, `sqlText: v` | `CALL` | `;` |
//! | BigQuery | `EXECUTE IMMEDIATE` | `CALL` | `;` |
//! | DuckDB / ANSI | `EXECUTE IMMEDIATE`, `EXEC(@v)` | `CALL` | `;` |

mod ansi;
mod bigquery;
mod duckdb;
pub mod helpers;
mod mysql;
mod oracle;
mod postgres;
mod redshift;
mod snowflake;
mod tsql;

pub use ansi::Ansi;
pub use bigquery::BigQuery;
pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use oracle::Oracle;
pub use postgres::Postgres;
pub use redshift::Redshift;
pub use snowflake::Snowflake;
pub use tsql::TSql;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// SQL dialect trait - describes how a dialect's SQL and procedure bodies are read.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug + Send + Sync {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Grammar
    // =========================================================================

    /// The `sqlparser` grammar used for structured parsing.
    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect>;

    // =========================================================================
    // Procedure Bodies
    // =========================================================================

    /// Line comment prefixes.
    ///
    /// Block comments (`/* */`) are shared by every dialect.
    fn line_comment_prefixes(&self) -> &'static [&'static str] {
        &["--"]
    }

    /// Pattern matching one static statement, leading keyword to terminator.
    fn statement_pattern(&self) -> &'static Regex;

    /// Dynamic SQL call sites.
    ///
    /// Each pattern captures either `var` (the variable holding the SQL text,
    /// as written, including any `@`/`:` sigil) or `lit` (an inline literal).
    /// A pattern may also capture `call` when the executed text is produced by
    /// a function call and cannot be resolved.
    fn dynamic_sql_patterns(&self) -> &'static [Regex];

    /// Procedure call sites, each capturing `name`.
    fn call_patterns(&self) -> &'static [Regex];

    /// String concatenation operator.
    ///
    /// - ANSI/PostgreSQL/Oracle/Snowflake: `||`
    /// - T-SQL: `+`
    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Whether `SELECT ... INTO x` inside a procedure creates table `x`
    /// rather than assigning variable `x`.
    fn select_into_creates_table(&self) -> bool {
        false
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Ansi,
    Postgres,
    Redshift,
    TSql,
    MySql,
    Oracle,
    Snowflake,
    BigQuery,
    DuckDb,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Ansi => &Ansi,
            Dialect::Postgres => &Postgres,
            Dialect::Redshift => &Redshift,
            Dialect::TSql => &TSql,
            Dialect::MySql => &MySql,
            Dialect::Oracle => &Oracle,
            Dialect::Snowflake => &Snowflake,
            Dialect::BigQuery => &BigQuery,
            Dialect::DuckDb => &DuckDb,
        }
    }

    /// All dialects, in declaration order.
    pub fn all() -> &'static [Dialect] {
        &[
            Dialect::Ansi,
            Dialect::Postgres,
            Dialect::Redshift,
            Dialect::TSql,
            Dialect::MySql,
            Dialect::Oracle,
            Dialect::Snowflake,
            Dialect::BigQuery,
            Dialect::DuckDb,
        ]
    }
}

/// Error returned when a dialect name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown SQL dialect: {0}")]
pub struct UnknownDialect(pub String);

impl std::str::FromStr for Dialect {
    type Err = UnknownDialect;

    /// Parse a dialect or procedure-language name.
    ///
    /// Accepts common aliases: `plsql` → Oracle, `plpgsql` → Postgres,
    /// `mssql`/`sqlserver` → T-SQL, `generic`/`sql` → ANSI.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ansi" | "generic" | "sql" => Ok(Dialect::Ansi),
            "postgres" | "postgresql" | "plpgsql" | "pg" => Ok(Dialect::Postgres),
            "redshift" => Ok(Dialect::Redshift),
            "tsql" | "t-sql" | "mssql" | "sqlserver" | "azuresql" | "synapse" => Ok(Dialect::TSql),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "oracle" | "plsql" | "pl/sql" => Ok(Dialect::Oracle),
            "snowflake" | "snowscript" => Ok(Dialect::Snowflake),
            "bigquery" => Ok(Dialect::BigQuery),
            "duckdb" => Ok(Dialect::DuckDb),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        self.dialect().parser_dialect()
    }

    fn line_comment_prefixes(&self) -> &'static [&'static str] {
        self.dialect().line_comment_prefixes()
    }

    fn statement_pattern(&self) -> &'static Regex {
        self.dialect().statement_pattern()
    }

    fn dynamic_sql_patterns(&self) -> &'static [Regex] {
        self.dialect().dynamic_sql_patterns()
    }

    fn call_patterns(&self) -> &'static [Regex] {
        self.dialect().call_patterns()
    }

    fn concat_operator(&self) -> &'static str {
        self.dialect().concat_operator()
    }

    fn select_into_creates_table(&self) -> bool {
        self.dialect().select_into_creates_table()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}
