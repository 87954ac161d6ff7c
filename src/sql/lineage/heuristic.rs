//! Keyword-regex lineage extraction.
//!
//! Used when structured parsing is disabled or fails. Only tables are
//! recovered; column lineage requires a real parse.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::types::{ExtractionMethod, LineageFact, QueryType};
use super::{LineageError, LineageStrategy};
use crate::sql::dialect::helpers::normalize_identifier;
use crate::sql::dialect::Dialect;

/// Confidence when a target table was found.
pub const CONFIDENCE_WITH_TARGET: f64 = 0.5;
/// Confidence when only source tables were found.
pub const CONFIDENCE_SOURCES_ONLY: f64 = 0.4;
/// Confidence when nothing was found.
pub const CONFIDENCE_EMPTY: f64 = 0.3;

/// Optionally quoted, optionally dotted identifier.
const IDENT: &str = r#"(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][\w$#]*)(?:\.(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][\w$#]*))*"#;

static TARGETS: LazyLock<Vec<(QueryType, Regex)>> = LazyLock::new(|| {
    let target = |pattern: &str| {
        Regex::new(&format!(r"(?i){}(?P<name>{})", pattern, IDENT)).expect("valid target pattern")
    };
    vec![
        (
            QueryType::Insert,
            target(r"\bINSERT\s+(?:OVERWRITE\s+)?INTO\s+(?:TABLE\s+)?"),
        ),
        (
            QueryType::Create,
            target(r"\bCREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:GLOBAL|LOCAL)\s+)?(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?"),
        ),
        (
            QueryType::CreateView,
            target(r"\bCREATE\s+(?:OR\s+REPLACE\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?"),
        ),
        (QueryType::Unknown, target(r"\bMERGE\s+INTO\s+")),
        (QueryType::Update, target(r"\bUPDATE\s+")),
        (QueryType::Delete, target(r"\bDELETE\s+FROM\s+")),
    ]
});

static SOURCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:FROM|JOIN|USING)\s+(?P<name>{})", IDENT))
        .expect("valid source pattern")
});

static CTE_NAMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bWITH(?:\s+RECURSIVE)?|,)\s*(?P<name>[A-Za-z_]\w*)\s+AS\s*\(")
        .expect("valid CTE pattern")
});

static SELECT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").expect("valid select pattern"));

/// Words that follow FROM/JOIN/USING without naming a table.
const NOT_A_TABLE: &[&str] = &[
    "SELECT", "LATERAL", "UNNEST", "DUAL", "WHERE", "GROUP", "ORDER", "VALUES", "TABLE", "ONLY",
];

/// Words whose trailing FROM does not introduce a table
/// (`DELETE FROM`, `EXTRACT(YEAR FROM ...)`, `IS DISTINCT FROM`, `TRIM(BOTH FROM ...)`).
const NON_TABLE_FROM: &[&str] = &[
    "DELETE", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND", "QUARTER", "WEEK", "EPOCH",
    "DISTINCT", "BOTH", "LEADING", "TRAILING",
];

/// Keyword-regex strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicParser;

impl HeuristicParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract lineage from text. Never fails.
    pub fn parse(&self, sql: &str) -> LineageFact {
        let mut fact = LineageFact::empty(ExtractionMethod::RegexFallback);

        let target = TARGETS
            .iter()
            .filter_map(|(kind, re)| re.captures(sql).map(|caps| (*kind, caps)))
            .filter_map(|(kind, caps)| {
                let m = caps.name("name")?;
                Some((m.start(), kind, normalize_identifier(m.as_str())))
            })
            .min_by_key(|(start, _, _)| *start);

        fact.source_tables = Self::scan_sources(sql);
        fact.query_type = match &target {
            Some((_, kind, _)) => *kind,
            None if SELECT_KEYWORD.is_match(sql) => QueryType::Select,
            None => QueryType::Unknown,
        };
        fact.target_table = target.map(|(_, _, name)| name);

        fact.confidence_score = if fact.target_table.is_some() {
            CONFIDENCE_WITH_TARGET
        } else if !fact.source_tables.is_empty() {
            CONFIDENCE_SOURCES_ONLY
        } else {
            CONFIDENCE_EMPTY
        };
        fact
    }

    /// Tables following FROM / JOIN / USING, minus CTE names.
    pub fn scan_sources(sql: &str) -> BTreeSet<String> {
        let ctes: HashSet<String> = CTE_NAMES
            .captures_iter(sql)
            .filter_map(|caps| caps.name("name"))
            .map(|m| m.as_str().to_lowercase())
            .collect();

        SOURCES
            .captures_iter(sql)
            .filter_map(|caps| {
                let keyword = caps.get(0)?;
                let name = caps.name("name")?;
                if keyword.as_str()[..4].eq_ignore_ascii_case("FROM")
                    && preceding_word(sql, keyword.start())
                        .is_some_and(|w| NON_TABLE_FROM.iter().any(|k| k.eq_ignore_ascii_case(w)))
                {
                    return None;
                }
                let raw = name.as_str();
                if NOT_A_TABLE.iter().any(|k| k.eq_ignore_ascii_case(raw)) {
                    return None;
                }
                let normalized = normalize_identifier(raw);
                if !normalized.contains('.') && ctes.contains(&normalized.to_lowercase()) {
                    return None;
                }
                Some(normalized)
            })
            .collect()
    }
}

impl LineageStrategy for HeuristicParser {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn extract(&self, sql: &str, _dialect: Dialect) -> Result<LineageFact, LineageError> {
        Ok(self.parse(sql))
    }
}

/// The word immediately before byte offset `end`, skipping whitespace and `(`.
fn preceding_word(text: &str, end: usize) -> Option<&str> {
    let head = text[..end].trim_end_matches(|c: char| c.is_whitespace() || c == '(');
    let start = head
        .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let word = &head[start..];
    (!word.is_empty()).then_some(word)
}
