//! Inter-procedure call dependencies.

use crate::sql::dialect::helpers::normalize_identifier;
use crate::sql::dialect::SqlDialect;

/// Names that call-site patterns pick up but that are not procedures:
/// control flow, DML keywords, builtin functions and system procedures.
const DENYLIST: &[&str] = &[
    // keywords
    "AND", "AS", "BEGIN", "CALL", "CASE", "CREATE", "DECLARE", "DELETE", "ELSE", "ELSIF", "END",
    "EXEC", "EXECUTE", "EXISTS", "FOR", "FROM", "FUNCTION", "IF", "IMMEDIATE", "IN", "INSERT",
    "INTO", "LOOP", "MERGE", "NOT", "NULL", "OR", "PERFORM", "PROCEDURE", "RETURN", "RETURNS",
    "SELECT", "SET", "THEN", "UPDATE", "VALUES", "WHEN", "WHERE", "WHILE", "WITH",
    // transaction control
    "COMMIT", "ROLLBACK", "SAVEPOINT",
    // builtins
    "AVG", "CAST", "COALESCE", "CONCAT", "CONVERT", "COUNT", "CURRENT_DATE", "CURRENT_TIMESTAMP",
    "DATEADD", "DATEDIFF", "FORMAT", "GETDATE", "ISNULL", "LEN", "LENGTH", "LOWER", "MAX", "MIN",
    "NOW", "NVL", "QUOTE_IDENT", "QUOTE_LITERAL", "QUOTENAME", "REPLACE", "ROUND", "SUBSTR",
    "SUBSTRING", "SUM", "SYSDATE", "TO_CHAR", "TO_DATE", "TRIM", "UPPER",
    // diagnostics and system procedures
    "PRINT", "RAISE", "RAISERROR", "RAISE_APPLICATION_ERROR", "THROW", "SP_EXECUTESQL",
    "SP_PREPARE", "SP_EXECUTE",
];

/// Package prefixes of vendor-supplied routines (`DBMS_OUTPUT.PUT_LINE`, `UTL_FILE.FOPEN`).
const SYSTEM_PREFIXES: &[&str] = &["DBMS_", "UTL_", "SYS."];

/// Called procedure names in first-seen order, excluding the denylist and
/// the procedure itself.
pub(super) fn extract_calls(
    masked: &str,
    dialect: &dyn SqlDialect,
    procedure_name: Option<&str>,
) -> Vec<String> {
    let mut matches: Vec<(usize, String)> = dialect
        .call_patterns()
        .iter()
        .flat_map(|pattern| pattern.captures_iter(masked))
        .filter_map(|caps| {
            let name = caps.name("name")?;
            Some((name.start(), normalize_identifier(name.as_str())))
        })
        .collect();
    matches.sort_by_key(|(start, _)| *start);

    let mut calls: Vec<String> = Vec::new();
    for (_, name) in matches {
        if name.is_empty() || is_denied(&name) || is_self(&name, procedure_name) {
            continue;
        }
        if !calls.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            calls.push(name);
        }
    }
    calls
}

fn is_denied(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    DENYLIST.contains(&upper.as_str()) || SYSTEM_PREFIXES.iter().any(|p| upper.starts_with(p))
}

/// A call matches the procedure itself on the full name, or on the last
/// segment when either side is unqualified.
fn is_self(name: &str, procedure_name: Option<&str>) -> bool {
    let Some(own) = procedure_name else {
        return false;
    };
    let own = normalize_identifier(own);
    if name.eq_ignore_ascii_case(&own) {
        return true;
    }
    let qualified = name.contains('.') && own.contains('.');
    !qualified && last_segment(name).eq_ignore_ascii_case(last_segment(&own))
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
