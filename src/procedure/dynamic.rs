//! Dynamic SQL call sites and variable resolution.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::scan::literal_segments;
use crate::sql::dialect::helpers::unescape_literal;
use crate::sql::dialect::SqlDialect;
use crate::sql::lineage::LineageFact;

/// Appended to partially resolved SQL text.
pub const TRUNCATION_MARKER: &str = " /* <truncated dynamic sql> */";

/// Confidence cap for literal or fully resolved dynamic SQL.
pub const RESOLVED_CONFIDENCE_CAP: f64 = 0.7;
/// Confidence cap for partially resolved dynamic SQL.
pub const PARTIAL_CONFIDENCE_CAP: f64 = 0.5;

/// How the executed text of a dynamic SQL site was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The call site executes an inline literal.
    Literal,
    /// The variable is assigned a single literal.
    Resolved,
    /// Only the first literal segment of a concatenation was kept.
    Partial,
    /// No usable assignment was found.
    Unresolved,
}

/// Lineage of one dynamic SQL call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicSqlLineage {
    #[serde(flatten)]
    pub fact: LineageFact,
    /// Variable holding the SQL text, as written at the call site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// Text that was parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_text: Option<String>,
    pub resolution: Resolution,
}

/// What a call site executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum SiteTarget {
    Literal(String),
    Variable(String),
    /// Text produced by a function call (`EXECUTE format(...)`).
    Opaque(String),
}

/// A dynamic SQL call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DynamicSite {
    pub offset: usize,
    pub target: SiteTarget,
}

/// Find dynamic SQL call sites, in text order.
///
/// `masked` must be `text` with literal contents blanked; sites whose match
/// starts inside a literal are ignored.
pub(super) fn find_sites(text: &str, masked: &str, dialect: &dyn SqlDialect) -> Vec<DynamicSite> {
    let mut sites: Vec<DynamicSite> = Vec::new();
    for pattern in dialect.dynamic_sql_patterns() {
        for caps in pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let offset = whole.start();
            if masked.as_bytes().get(offset) != text.as_bytes().get(offset) {
                continue;
            }
            let target = if let Some(lit) = caps.name("lit") {
                SiteTarget::Literal(unescape_literal(lit.as_str()))
            } else if let Some(var) = caps.name("var") {
                SiteTarget::Variable(var.as_str().to_string())
            } else if let Some(call) = caps.name("call") {
                SiteTarget::Opaque(call.as_str().to_string())
            } else {
                continue;
            };
            if sites.iter().all(|s| s.offset != offset) {
                sites.push(DynamicSite { offset, target });
            }
        }
    }
    sites.sort_by_key(|s| s.offset);
    sites
}

/// Recover the SQL text assigned to `variable` for a call at `call_offset`.
///
/// The last assignment before the call wins, else the first assignment
/// anywhere. Self-appending assignments (`v := v || '...'`) defer to the
/// earlier base assignment and yield a partial result.
pub(super) fn resolve_variable(
    text: &str,
    masked: &str,
    variable: &str,
    call_offset: usize,
    dialect: &dyn SqlDialect,
) -> (Resolution, Option<String>) {
    let bare = variable.trim_start_matches(['@', ':']);
    let assignments = find_assignments(text, masked, bare, dialect.concat_operator());

    let chosen = assignments
        .iter()
        .rposition(|a| a.offset < call_offset)
        .or(if assignments.is_empty() { None } else { Some(0) });
    let Some(index) = chosen else {
        return (Resolution::Unresolved, None);
    };

    let assignment = &assignments[index];
    if assignment.appends_to(bare) {
        let base = assignments[..index].iter().rev().find(|a| !a.appends_to(bare));
        return match base.and_then(|b| b.first_literal()) {
            Some(head) => (Resolution::Partial, Some(format!("{}{}", head, TRUNCATION_MARKER))),
            None => (Resolution::Unresolved, None),
        };
    }

    let segments = literal_segments(&assignment.rhs);
    match segments.first() {
        None => (Resolution::Unresolved, None),
        Some((range, body)) if segments.len() == 1 && is_sole_literal(&assignment.rhs, range) => {
            (Resolution::Resolved, Some(body.clone()))
        }
        Some((_, body)) => (Resolution::Partial, Some(format!("{}{}", body, TRUNCATION_MARKER))),
    }
}

// =============================================================================
// Assignments
// =============================================================================

/// Words after which `name = ...` is a comparison rather than an assignment.
const COMPARISON_CONTEXT: &[&str] = &[
    "IF", "ELSIF", "WHEN", "WHILE", "AND", "OR", "NOT", "WHERE", "ON", "CASE", "HAVING",
];

#[derive(Debug)]
struct Assignment {
    offset: usize,
    rhs: String,
}

impl Assignment {
    /// `v := v || ...` style accumulation.
    fn appends_to(&self, bare: &str) -> bool {
        let rhs = self.rhs.trim_start();
        let rhs = rhs.trim_start_matches(['@', ':']);
        rhs.len() >= bare.len()
            && rhs.is_char_boundary(bare.len())
            && rhs[..bare.len()].eq_ignore_ascii_case(bare)
            && !rhs[bare.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn first_literal(&self) -> Option<String> {
        literal_segments(&self.rhs).into_iter().next().map(|(_, body)| body)
    }
}

fn find_assignments(text: &str, masked: &str, bare: &str, concat: &str) -> Vec<Assignment> {
    let pattern = format!(
        r"(?i)(?:^|[^\w@:$#.])[@:]?{}\b(?:[ \t]+[A-Za-z_]\w*(?:\s*\([^)]*\))?)?[ \t]*:?=",
        regex::escape(bare)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };

    re.find_iter(masked)
        .filter(|m| !matches!(masked[m.end()..].chars().next(), Some('=') | Some('>')))
        .filter(|m| {
            preceding_word(masked, m.start() + 1)
                .map(|w| !COMPARISON_CONTEXT.iter().any(|k| k.eq_ignore_ascii_case(w)))
                .unwrap_or(true)
        })
        .map(|m| Assignment {
            offset: m.start(),
            rhs: assignment_rhs(text, m.end(), concat).to_string(),
        })
        .collect()
}

/// Right-hand side of an assignment starting at byte `start`.
///
/// Ends at `;` or at a newline outside literals and parentheses, unless the
/// expression continues with the concatenation operator across the break.
fn assignment_rhs<'a>(text: &'a str, start: usize, concat: &str) -> &'a str {
    let rhs = &text[start..];
    let mut in_literal = false;
    let mut depth: i32 = 0;

    for (i, c) in rhs.char_indices() {
        if c == '\'' {
            in_literal = !in_literal;
            continue;
        }
        if in_literal {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return rhs[..i].trim();
                }
            }
            ';' if depth == 0 => return rhs[..i].trim(),
            '\n' if depth == 0 => {
                let before = rhs[..i].trim_end();
                let after = rhs[i + 1..].trim_start();
                let continues = before.ends_with(concat)
                    || before.ends_with(',')
                    || after.starts_with(concat);
                if !continues {
                    return rhs[..i].trim();
                }
            }
            _ => {}
        }
    }
    rhs.trim()
}

/// True if the literal at `range` is the only thing in `rhs` apart from an
/// `N` prefix, whitespace and wrapping parentheses.
fn is_sole_literal(rhs: &str, range: &std::ops::Range<usize>) -> bool {
    let outside = format!("{}{}", &rhs[..range.start], &rhs[range.end..]);
    let residue: String = outside
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    residue.is_empty() || residue.eq_ignore_ascii_case("N")
}

/// The word ending just before byte `end`.
fn preceding_word(text: &str, end: usize) -> Option<&str> {
    let head = text.get(..end)?.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
    let start = head
        .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let word = &head[start..];
    (!word.is_empty()).then_some(word)
}
