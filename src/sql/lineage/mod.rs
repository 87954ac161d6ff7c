//! SQL lineage extraction.
//!
//! Two strategies sit behind [`LineageStrategy`]:
//!
//! - [`StructuredParser`] - full `sqlparser` parse with a dialect-aware grammar
//! - [`HeuristicParser`] - case-insensitive keyword regexes
//!
//! [`SqlLineageParser`] applies them in order. Whether the structured strategy
//! is available is decided once, at construction; any structured failure
//! falls back to the heuristic and is recorded in the fact's warnings.
//! Parsing never returns an error to the caller.

mod heuristic;
mod structured;
mod types;

pub use heuristic::{
    HeuristicParser, CONFIDENCE_EMPTY, CONFIDENCE_SOURCES_ONLY, CONFIDENCE_WITH_TARGET,
};
pub use structured::{StructuredParser, DEFAULT_MAX_SUBQUERY_DEPTH};
pub use types::{ColumnMapping, ExtractionMethod, LineageFact, QueryType, TransformationType};

use thiserror::Error;
use tracing::debug;

use crate::sql::dialect::Dialect;

/// Why a strategy could not produce a fact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineageError {
    #[error("empty SQL input")]
    EmptyInput,

    #[error("no statements found")]
    NoStatements,

    #[error("syntax error: {0}")]
    Syntax(String),
}

/// A way of turning SQL text into a [`LineageFact`].
pub trait LineageStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Extract lineage from one statement.
    fn extract(&self, sql: &str, dialect: Dialect) -> Result<LineageFact, LineageError>;
}

/// Structured-first lineage parser with heuristic fallback.
#[derive(Debug, Clone)]
pub struct SqlLineageParser {
    structured: Option<StructuredParser>,
    heuristic: HeuristicParser,
}

impl Default for SqlLineageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlLineageParser {
    /// Parser with the structured strategy enabled.
    pub fn new() -> Self {
        Self::with_structured(Some(StructuredParser::new()))
    }

    /// Parser that only ever uses the heuristic strategy.
    pub fn heuristic_only() -> Self {
        Self::with_structured(None)
    }

    pub fn with_structured(structured: Option<StructuredParser>) -> Self {
        Self {
            structured,
            heuristic: HeuristicParser::new(),
        }
    }

    /// Build from the `[parser]` settings section.
    pub fn from_settings(settings: &crate::config::ParserSettings) -> Self {
        let structured = settings
            .structured
            .then(|| StructuredParser::with_max_depth(settings.max_subquery_depth));
        Self::with_structured(structured)
    }

    /// Whether the structured strategy is available.
    pub fn is_structured(&self) -> bool {
        self.structured.is_some()
    }

    /// Parse one statement. Never fails.
    pub fn parse(&self, sql: &str, dialect: Dialect) -> LineageFact {
        let Some(structured) = &self.structured else {
            return self.heuristic.parse(sql);
        };

        match structured.extract(sql, dialect) {
            Ok(fact) => fact,
            Err(e) => {
                debug!(
                    error = %e,
                    dialect = %dialect,
                    "structured parse failed, using regex fallback"
                );
                let mut fact = self.heuristic.parse(sql);
                fact.add_warning(format!(
                    "{} parse failed ({}); used {} fallback",
                    structured.name(),
                    e,
                    self.heuristic.name()
                ));
                fact
            }
        }
    }
}
