//! Stored procedure lineage extraction.
//!
//! A procedure body is read in five steps:
//!
//! 1. Comments are stripped (literal-aware, per-dialect line prefixes)
//! 2. Static statements are matched on literal-masked text and parsed
//!    through [`SqlLineageParser`]
//! 3. Dynamic SQL call sites are found and their SQL text recovered from
//!    variable assignments where possible
//! 4. Calls to other procedures are collected
//! 5. Table sets are merged and a confidence assigned
//!
//! Parsing never fails: scan errors and oversize bodies produce a partial
//! result with `error` set.

mod calls;
mod dynamic;
mod scan;

pub use dynamic::{
    DynamicSqlLineage, Resolution, PARTIAL_CONFIDENCE_CAP, RESOLVED_CONFIDENCE_CAP,
    TRUNCATION_MARKER,
};

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sql::dialect::helpers::normalize_identifier;
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::lineage::{ColumnMapping, ExtractionMethod, LineageFact, SqlLineageParser};
use dynamic::SiteTarget;

/// Default body size limit (1 MiB).
pub const DEFAULT_MAX_PROCEDURE_BYTES: usize = 1024 * 1024;

/// Confidence with no lineage found.
pub const BASE_CONFIDENCE: f64 = 0.7;
/// Confidence when only static SQL contributed lineage.
pub const STATIC_LINEAGE_CONFIDENCE: f64 = 0.8;
/// Confidence of a partial result.
pub const FAILURE_CONFIDENCE: f64 = 0.3;

/// Keywords that end a T-SQL statement without a semicolon and are consumed
/// by the statement pattern.
const BLOCK_KEYWORDS: &[&str] = &[
    "GO", "END", "BEGIN", "IF", "ELSE", "WHILE", "RETURN", "DECLARE", "EXEC", "EXECUTE", "PRINT",
];

static PROCEDURE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bCREATE\s+(?:OR\s+(?:REPLACE|ALTER)\s+)?(?:PROCEDURE|PROC|FUNCTION)\s+(?P<name>(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][\w$#]*)(?:\.(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][\w$#]*))*)"#,
    )
    .expect("valid procedure header pattern")
});

/// Internal failures that abort procedure parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcedureError {
    #[error("unterminated block comment at byte {offset}")]
    UnterminatedComment { offset: usize },

    #[error("unterminated string literal at byte {offset}")]
    UnterminatedLiteral { offset: usize },

    #[error("procedure body is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Lineage of one stored procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureLineageFact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_name: Option<String>,
    pub language: Dialect,
    pub static_sql_lineage: Vec<LineageFact>,
    pub dynamic_sql_lineage: Vec<DynamicSqlLineage>,
    pub procedure_dependencies: Vec<String>,
    pub all_source_tables: BTreeSet<String>,
    pub all_target_tables: BTreeSet<String>,
    pub column_lineage: Vec<ColumnMapping>,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcedureLineageFact {
    fn new(language: Dialect, procedure_name: Option<String>) -> Self {
        Self {
            procedure_name,
            language,
            static_sql_lineage: Vec::new(),
            dynamic_sql_lineage: Vec::new(),
            procedure_dependencies: Vec::new(),
            all_source_tables: BTreeSet::new(),
            all_target_tables: BTreeSet::new(),
            column_lineage: Vec::new(),
            confidence_score: BASE_CONFIDENCE,
            error: None,
        }
    }

    fn failed(mut self, error: &ProcedureError) -> Self {
        self.confidence_score = FAILURE_CONFIDENCE;
        self.error = Some(error.to_string());
        self
    }

    fn merge(&mut self, fact: &LineageFact) {
        self.all_source_tables.extend(fact.source_tables.iter().cloned());
        self.all_target_tables.extend(fact.target_table.iter().cloned());
        for mapping in &fact.column_lineage {
            if !self.column_lineage.contains(mapping) {
                self.column_lineage.push(mapping.clone());
            }
        }
    }

    /// True if any static or dynamic statement named a table.
    pub fn has_lineage(&self) -> bool {
        !self.all_source_tables.is_empty() || !self.all_target_tables.is_empty()
    }
}

/// Procedure parser with configured SQL parsing and size limit.
#[derive(Debug, Clone)]
pub struct ProcedureLineageParser {
    sql: SqlLineageParser,
    max_bytes: usize,
}

impl Default for ProcedureLineageParser {
    fn default() -> Self {
        Self::new(SqlLineageParser::new())
    }
}

impl ProcedureLineageParser {
    pub fn new(sql: SqlLineageParser) -> Self {
        Self {
            sql,
            max_bytes: DEFAULT_MAX_PROCEDURE_BYTES,
        }
    }

    /// Build from the `[parser]` settings section.
    pub fn from_settings(settings: &crate::config::ParserSettings) -> Self {
        Self::new(SqlLineageParser::from_settings(settings))
            .with_max_bytes(settings.max_procedure_bytes)
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Parse a procedure body. Never fails.
    ///
    /// When `procedure_name` is absent it is taken from a
    /// `CREATE PROCEDURE|FUNCTION` header if one is present.
    pub fn parse(
        &self,
        code: &str,
        language: Dialect,
        procedure_name: Option<&str>,
    ) -> ProcedureLineageFact {
        let name = procedure_name.map(str::to_string);
        let result = ProcedureLineageFact::new(language, name.clone());

        if code.len() > self.max_bytes {
            let error = ProcedureError::TooLarge {
                size: code.len(),
                limit: self.max_bytes,
            };
            warn!(%error, "procedure rejected");
            return result.failed(&error);
        }

        let stripped = match scan::strip_comments(code, language.line_comment_prefixes()) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, procedure = ?name, "procedure scan failed");
                return result.failed(&error);
            }
        };
        let masked = match scan::mask_literals(&stripped) {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, procedure = ?name, "procedure scan failed");
                return result.failed(&error);
            }
        };

        let mut result = result;
        if result.procedure_name.is_none() {
            result.procedure_name = PROCEDURE_HEADER
                .captures(&masked)
                .and_then(|caps| caps.name("name"))
                .map(|m| normalize_identifier(m.as_str()));
        }

        // Static statements
        for m in language.statement_pattern().find_iter(&masked) {
            let statement = normalize_statement(&stripped[m.range()]);
            if statement.is_empty() {
                continue;
            }
            let fact = self.sql.parse(&statement, language);
            if fact.has_lineage() {
                result.merge(&fact);
                result.static_sql_lineage.push(fact);
            }
        }

        // Dynamic SQL
        let mut dynamic_contributed = false;
        for site in dynamic::find_sites(&stripped, &masked, &language) {
            let entry = self.parse_dynamic(&stripped, &masked, &site, language);
            if entry.fact.has_lineage() {
                dynamic_contributed = true;
                result.merge(&entry.fact);
            }
            result.dynamic_sql_lineage.push(entry);
        }

        // Calls
        result.procedure_dependencies =
            calls::extract_calls(&masked, &language, result.procedure_name.as_deref());

        result.confidence_score = if dynamic_contributed {
            BASE_CONFIDENCE
        } else if result.has_lineage() {
            STATIC_LINEAGE_CONFIDENCE
        } else {
            BASE_CONFIDENCE
        };

        debug!(
            procedure = ?result.procedure_name,
            statements = result.static_sql_lineage.len(),
            dynamic = result.dynamic_sql_lineage.len(),
            "procedure parsed"
        );
        result
    }

    fn parse_dynamic(
        &self,
        text: &str,
        masked: &str,
        site: &dynamic::DynamicSite,
        language: Dialect,
    ) -> DynamicSqlLineage {
        let (variable, resolution, sql_text) = match &site.target {
            SiteTarget::Literal(sql) => (None, Resolution::Literal, Some(sql.clone())),
            SiteTarget::Variable(var) => {
                let (resolution, sql) =
                    dynamic::resolve_variable(text, masked, var, site.offset, &language);
                (Some(var.clone()), resolution, sql)
            }
            SiteTarget::Opaque(call) => {
                let mut fact = LineageFact::empty(ExtractionMethod::RegexFallback);
                fact.add_warning(format!("dynamic SQL built by {}() cannot be resolved", call));
                warn!(function = %call, "dynamic SQL cannot be resolved");
                return DynamicSqlLineage {
                    fact,
                    variable: None,
                    sql_text: None,
                    resolution: Resolution::Unresolved,
                };
            }
        };

        let fact = match (&sql_text, resolution) {
            (Some(sql), Resolution::Partial) => {
                let mut fact = self.sql.parse(sql, language);
                fact.cap_confidence(PARTIAL_CONFIDENCE_CAP);
                fact
            }
            (Some(sql), _) => {
                let mut fact = self.sql.parse(sql, language);
                fact.cap_confidence(RESOLVED_CONFIDENCE_CAP);
                fact
            }
            (None, _) => {
                let mut fact = LineageFact::empty(ExtractionMethod::RegexFallback);
                if let Some(var) = &variable {
                    fact.add_warning(format!(
                        "no assignment found for dynamic SQL variable {}",
                        var
                    ));
                    warn!(variable = %var, "dynamic SQL variable cannot be resolved");
                }
                fact
            }
        };

        DynamicSqlLineage {
            fact,
            variable,
            sql_text,
            resolution,
        }
    }
}

/// Parse a procedure body with default settings.
pub fn parse_procedure(
    code: &str,
    language: Dialect,
    procedure_name: Option<&str>,
) -> ProcedureLineageFact {
    ProcedureLineageParser::default().parse(code, language, procedure_name)
}

/// Trim the terminator from a matched statement and collapse whitespace.
fn normalize_statement(raw: &str) -> String {
    let raw = raw.trim_end();
    let body = match raw.strip_suffix(';') {
        Some(body) => body,
        None => match raw.rfind('\n') {
            Some(idx)
                if BLOCK_KEYWORDS
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(raw[idx + 1..].trim())) =>
            {
                &raw[..idx]
            }
            _ => raw,
        },
    };
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}
