//! SQL reading.
//!
//! - [`dialect`] - dialect grammars and procedure-language patterns
//! - [`lineage`] - statement-level lineage extraction

pub mod dialect;
pub mod lineage;

pub use dialect::{Dialect, SqlDialect};
pub use lineage::{
    ColumnMapping, ExtractionMethod, LineageFact, LineageStrategy, QueryType, SqlLineageParser,
    TransformationType,
};

/// Parse one SQL statement with the default (structured-first) parser.
///
/// Never fails: unparseable input degrades to the regex fallback.
pub fn parse_sql(sql: &str, dialect: Dialect) -> LineageFact {
    SqlLineageParser::new().parse(sql, dialect)
}
