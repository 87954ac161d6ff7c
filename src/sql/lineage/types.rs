//! Lineage fact types produced by SQL parsing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// =============================================================================
// Classification
// =============================================================================

/// Top-level kind of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    Create,
    Insert,
    Select,
    CreateView,
    Update,
    Delete,
    Unknown,
}

impl QueryType {
    /// Confidence assigned by the structured strategy.
    pub fn structured_confidence(self) -> f64 {
        match self {
            QueryType::Create | QueryType::Insert | QueryType::CreateView => 0.9,
            QueryType::Update | QueryType::Delete => 0.8,
            QueryType::Select => 0.7,
            QueryType::Unknown => 0.5,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryType::Create => "CREATE",
            QueryType::Insert => "INSERT",
            QueryType::Select => "SELECT",
            QueryType::CreateView => "CREATE_VIEW",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Which strategy produced a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Full syntactic parse.
    Structured,
    /// Keyword regex scan.
    RegexFallback,
}

/// How a target column is derived from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    /// Column is copied or computed row-by-row.
    PassThrough,
    /// Column is the output of an aggregate function.
    Aggregate,
}

impl TransformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::PassThrough => "pass_through",
            TransformationType::Aggregate => "aggregate",
        }
    }
}

// =============================================================================
// Facts
// =============================================================================

/// One source-to-target column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_column: String,
    pub transformation_type: TransformationType,
    /// Original expression text when the source is not a bare column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ColumnMapping {
    pub fn pass_through(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_column: source.into(),
            target_column: target.into(),
            transformation_type: TransformationType::PassThrough,
            expression: None,
        }
    }

    pub fn aggregate(
        source: impl Into<String>,
        target: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            source_column: source.into(),
            target_column: target.into(),
            transformation_type: TransformationType::Aggregate,
            expression: Some(expression.into()),
        }
    }
}

/// Structured output of parsing one SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageFact {
    pub source_tables: BTreeSet<String>,
    pub target_table: Option<String>,
    pub column_lineage: Vec<ColumnMapping>,
    pub query_type: QueryType,
    pub confidence_score: f64,
    pub extraction_method: ExtractionMethod,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl LineageFact {
    /// A fact with no tables, no columns and zero confidence.
    pub fn empty(extraction_method: ExtractionMethod) -> Self {
        Self {
            source_tables: BTreeSet::new(),
            target_table: None,
            column_lineage: Vec::new(),
            query_type: QueryType::Unknown,
            confidence_score: 0.0,
            extraction_method,
            warnings: Vec::new(),
        }
    }

    /// True if the fact names at least one table.
    pub fn has_lineage(&self) -> bool {
        self.target_table.is_some() || !self.source_tables.is_empty()
    }

    /// Lower the confidence to at most `cap`.
    pub fn cap_confidence(&mut self, cap: f64) {
        self.confidence_score = self.confidence_score.min(cap);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}
