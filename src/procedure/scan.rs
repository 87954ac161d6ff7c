//! Literal-aware text scanning for procedure bodies.
//!
//! Two passes share one scanner:
//! - [`strip_comments`] removes line and block comments outside literals
//! - [`mask_literals`] blanks literal contents so keyword patterns only see code
//!
//! `'...'` literals (with `''` escapes) and `"..."` quoted identifiers are
//! both respected; only `'...'` contents are masked.

use super::ProcedureError;

/// Remove comments, keeping line structure.
///
/// Line comments are dropped up to (not including) the newline; block
/// comments become a single space plus the newlines they spanned.
pub fn strip_comments(code: &str, line_prefixes: &[&str]) -> Result<String, ProcedureError> {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    let mut offset = 0;

    while let Some(c) = rest.chars().next() {
        if c == '\'' || c == '"' {
            let len = quoted_len(rest, c).ok_or(ProcedureError::UnterminatedLiteral { offset })?;
            out.push_str(&rest[..len]);
            rest = &rest[len..];
            offset += len;
        } else if rest.starts_with("/*") {
            let end = rest[2..]
                .find("*/")
                .ok_or(ProcedureError::UnterminatedComment { offset })?;
            let comment = &rest[..end + 4];
            out.push(' ');
            out.extend(comment.chars().filter(|&c| c == '\n'));
            rest = &rest[comment.len()..];
            offset += comment.len();
        } else if line_prefixes.iter().any(|p| rest.starts_with(p)) {
            let len = rest.find('\n').unwrap_or(rest.len());
            rest = &rest[len..];
            offset += len;
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            offset += c.len_utf8();
        }
    }

    Ok(out)
}

/// Replace `'...'` literal contents with spaces of equal byte length.
///
/// Byte offsets into the result are valid offsets into the input.
pub fn mask_literals(text: &str) -> Result<String, ProcedureError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut offset = 0;

    while let Some(c) = rest.chars().next() {
        if c == '\'' || c == '"' {
            let len = quoted_len(rest, c).ok_or(ProcedureError::UnterminatedLiteral { offset })?;
            if c == '\'' {
                out.push('\'');
                out.extend(std::iter::repeat(' ').take(len - 2));
                out.push('\'');
            } else {
                out.push_str(&rest[..len]);
            }
            rest = &rest[len..];
            offset += len;
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            offset += c.len_utf8();
        }
    }

    Ok(out)
}

/// Byte length of the quoted run at the start of `text`, quotes included.
///
/// A doubled quote inside the run is an escape.
fn quoted_len(text: &str, quote: char) -> Option<usize> {
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            if chars.peek().map(|&(_, next)| next) == Some(quote) {
                chars.next();
                continue;
            }
            return Some(i + 1);
        }
    }
    None
}

/// Single-quoted literal bodies in order, unescaped, with their byte ranges
/// (quotes included).
pub fn literal_segments(text: &str) -> Vec<(std::ops::Range<usize>, String)> {
    let mut segments = Vec::new();
    let mut offset = 0;
    while let Some(pos) = text[offset..].find('\'') {
        let start = offset + pos;
        let Some(len) = quoted_len(&text[start..], '\'') else {
            break;
        };
        let body = &text[start + 1..start + len - 1];
        segments.push((start..start + len, body.replace("''", "'")));
        offset = start + len;
    }
    segments
}
