//! Shared building blocks for dialect implementations.
//!
//! Dialects compose these to describe their procedure-language surface
//! (statement boundaries, dynamic SQL call sites, call dependencies) with
//! minimal duplication.

use regex::Regex;

// =============================================================================
// Pattern Fragments
// =============================================================================

/// Keywords that open a lineage-bearing statement.
///
/// `CREATE` is restricted to tables and views so that `CREATE PROCEDURE`
/// headers do not swallow the whole body.
pub const STATEMENT_START: &str = r"\b(?:SELECT|INSERT\s+(?:OVERWRITE\s+)?INTO|UPDATE|DELETE|MERGE\s+INTO|CREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:GLOBAL|LOCAL)\s+)?(?:TEMP(?:ORARY)?\s+)?(?:TABLE|VIEW))\b";

/// Plain `;` statement terminator.
/// Used by: ANSI, Postgres, Redshift, Oracle, MySQL, Snowflake, BigQuery, DuckDB
pub const SEMICOLON_TERMINATOR: &str = r";";

/// Unquoted identifier, optionally dotted.
pub const DOTTED_IDENT: &str = r"[A-Za-z_][\w$#]*(?:\.[A-Za-z_][\w$#]*)*";

/// Single-quoted literal body (`''` escapes), captured as `lit`.
pub const QUOTED_LITERAL: &str = r"'(?P<lit>(?:[^']|'')*)'";

// =============================================================================
// Compilation
// =============================================================================

/// Build the statement-boundary pattern for a terminator fragment.
///
/// A statement runs from a leading keyword to the first terminator (or end of
/// input), spanning lines.
pub fn statement_regex(terminator: &str) -> Regex {
    Regex::new(&format!(r"(?is){}.*?(?:{}|\z)", STATEMENT_START, terminator))
        .expect("statement pattern is valid")
}

/// Compile a fixed set of patterns.
pub fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("dialect pattern is valid"))
        .collect()
}

/// `EXECUTE IMMEDIATE <literal | variable>` (Oracle, BigQuery, Snowflake, ANSI).
///
/// `sigil` is a pattern fragment for an optional variable prefix (e.g. `:?`).
pub fn execute_immediate(sigil: &str) -> String {
    format!(
        r"(?i)\bEXECUTE\s+IMMEDIATE\s+(?:{}|(?P<var>{}[A-Za-z_][\w$#]*))",
        QUOTED_LITERAL, sigil
    )
}

/// `CALL <name>` (most dialects).
pub fn call_statement() -> String {
    format!(r"(?i)\bCALL\s+(?P<name>{})", DOTTED_IDENT)
}

// =============================================================================
// Identifiers
// =============================================================================

/// Strip identifier quoting (`"x"`, `` `x` ``, `[x]`) from each dotted part.
///
/// Case is preserved. Parts that themselves contain a dot keep double quotes.
pub fn normalize_identifier(raw: &str) -> String {
    split_qualified(raw)
        .into_iter()
        .map(|part| {
            let bare = part
                .trim()
                .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'));
            // A dot inside a part stays quoted so the result splits back the same way.
            if bare.contains('.') {
                format!("\"{}\"", bare)
            } else {
                bare.to_string()
            }
        })
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Split on dots that sit outside `"..."`, `` `...` `` and `[...]`.
fn split_qualified(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut closing: Option<char> = None;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match closing {
            Some(close) if c == close => closing = None,
            Some(_) => {}
            None => match c {
                '"' | '`' => closing = Some(c),
                '[' => closing = Some(']'),
                '.' => {
                    parts.push(&raw[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&raw[start..]);
    parts
}

/// Unescape the body of a single-quoted literal (`''` → `'`).
pub fn unescape_literal(body: &str) -> String {
    body.replace("''", "'")
}
