//! Text helpers for the statements the operation handlers build.
//!
//! Identifiers never travel as parameters, so they are sanitized and
//! bracket-quoted here. Values always travel as bound parameters; the only
//! literals ever rendered are column defaults in DDL.

use chrono::Utc;
use serde_json::Value;

use crate::classifier;
use crate::errors::ToolError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_SCHEMA: &str = "dbo";
pub const MAX_IDENTIFIER_LEN: usize = 128;
const MAX_TYPE_NAME_LEN: usize = 128;

/// Niladic functions accepted verbatim as column defaults.
const DEFAULT_FUNCTIONS: &[&str] = &[
    "GETDATE()",
    "GETUTCDATE()",
    "SYSDATETIME()",
    "SYSUTCDATETIME()",
    "SYSDATETIMEOFFSET()",
    "CURRENT_TIMESTAMP",
    "NEWID()",
    "NEWSEQUENTIALID()",
];

// -----------------------------------------------------------------------------
// ----- Identifiers -----------------------------------------------------------

/// Keeps `[A-Za-z0-9_-]` and drops everything else. Fails when nothing is
/// left or the result is longer than 128 characters.
pub fn sanitize_identifier(raw: &str, what: &str) -> Result<String, ToolError> {
    let clean: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if clean.is_empty() {
        return Err(ToolError::validation(format!(
            "invalid {what} '{raw}': no valid identifier characters"
        )));
    }
    if clean.len() > MAX_IDENTIFIER_LEN {
        return Err(ToolError::validation(format!(
            "{what} too long: {} characters (max {MAX_IDENTIFIER_LEN})",
            clean.len()
        )));
    }
    Ok(clean)
}

pub fn quote(identifier: &str) -> String {
    format!("[{identifier}]")
}

/// A sanitized `[schema].[object]` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub schema: String,
    pub name: String,
}

impl ObjectName {
    pub fn resolve(schema: Option<&str>, name: &str, what: &str) -> Result<Self, ToolError> {
        let schema = match schema {
            Some(s) if !s.trim().is_empty() => sanitize_identifier(s, "schema name")?,
            _ => DEFAULT_SCHEMA.to_string(),
        };
        Ok(Self {
            schema,
            name: sanitize_identifier(name, what)?,
        })
    }

    pub fn sql(&self) -> String {
        format!("{}.{}", quote(&self.schema), quote(&self.name))
    }
}

/// Column list rendered as `[a], [b], [c]`.
pub fn column_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote(n))
        .collect::<Vec<_>>()
        .join(", ")
}

// -----------------------------------------------------------------------------
// ----- DDL fragments ---------------------------------------------------------

/// Data type names may only use letters, digits, `_`, parentheses, commas
/// and spaces (`NVARCHAR(MAX)`, `DECIMAL(10, 2)`, `DOUBLE PRECISION`).
pub fn validate_type_name(type_name: &str) -> Result<String, ToolError> {
    let trimmed = type_name.trim();
    if trimmed.is_empty() {
        return Err(ToolError::validation("column type cannot be empty"));
    }
    if trimmed.len() > MAX_TYPE_NAME_LEN {
        return Err(ToolError::validation(format!(
            "column type too long: {} characters (max {MAX_TYPE_NAME_LEN})",
            trimmed.len()
        )));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ')))
    {
        return Err(ToolError::validation(format!(
            "invalid column type '{trimmed}': contains '{bad}'"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn escape_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Renders a column default as a literal. Strings become `N'...'` with
/// quotes doubled.
pub fn render_default(value: &Value) -> Result<String, ToolError> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => {
            let upper = s.trim().to_ascii_uppercase();
            if DEFAULT_FUNCTIONS.contains(&upper.as_str()) {
                return Ok(upper);
            }
            Ok(format!("N'{}'", escape_string_literal(s)))
        }
        other => Err(ToolError::validation(format!(
            "unsupported column default: {other}"
        ))),
    }
}

// -----------------------------------------------------------------------------
// ----- Placeholders ----------------------------------------------------------

/// Rewrites `?` placeholders to `@P{n}` starting at `first`, skipping string
/// literals, quoted identifiers and comments. Returns the rewritten text and
/// the number of placeholders found.
pub fn bind_placeholders(fragment: &str, first: usize) -> (String, usize) {
    let mut out = String::with_capacity(fragment.len() + 8);
    let mut chars = fragment.chars().peekable();
    let mut closing: Option<char> = None;
    let mut count = 0;

    while let Some(c) = chars.next() {
        if let Some(end) = closing {
            out.push(c);
            if c == ']' && end == ']' && chars.peek() == Some(&']') {
                chars.next();
                out.push(']');
            } else if c == end {
                closing = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                closing = Some(c);
                out.push(c);
            }
            '[' => {
                closing = Some(']');
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(c);
                for next in chars.by_ref() {
                    out.push(next);
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(c);
                let mut prev = '\0';
                for next in chars.by_ref() {
                    out.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            '?' => {
                out.push_str(&format!("@P{}", first + count));
                count += 1;
            }
            _ => out.push(c),
        }
    }
    (out, count)
}

/// Binds `params` into `fragment` and checks the counts line up.
pub fn bind_exact(
    fragment: &str,
    first: usize,
    params: &[Value],
) -> Result<String, ToolError> {
    let (sql, count) = bind_placeholders(fragment, first);
    if count != params.len() {
        return Err(ToolError::validation(format!(
            "expected {count} parameter(s) for placeholders, got {}",
            params.len()
        )));
    }
    Ok(sql)
}

/// Raw condition fragments may not carry statement separators or comments.
pub fn validate_condition(clause: &str) -> Result<(), ToolError> {
    if clause.trim().is_empty() {
        return Err(ToolError::validation(
            "a non-empty WHERE clause is required",
        ));
    }
    let (outside, _) = outside_literals(clause);
    if outside.contains(';') {
        return Err(ToolError::validation("WHERE clause may not contain ';'"));
    }
    if outside.contains("--") || outside.contains("/*") || outside.contains("*/") {
        return Err(ToolError::validation("WHERE clause may not contain comments"));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Row limits ------------------------------------------------------------

/// True when the query already limits its own rows with `TOP` or `FETCH`.
pub fn has_row_limit(query: &str) -> bool {
    classifier::normalize(query)
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|w| w == "TOP" || w == "FETCH")
}

/// Inserts `TOP n` after the leading `SELECT` (or `SELECT DISTINCT` /
/// `SELECT ALL`). Text that does not start with `SELECT` is returned as-is.
pub fn inject_top(query: &str, limit: usize) -> String {
    let start = skip_trivia(query, 0);
    let Some(after_select) = match_word(query, start, "SELECT") else {
        return query.to_string();
    };

    let next = skip_trivia(query, after_select);
    let insert_at = match_word(query, next, "DISTINCT")
        .or_else(|| match_word(query, next, "ALL"))
        .unwrap_or(after_select);

    let mut out = String::with_capacity(query.len() + 16);
    out.push_str(&query[..insert_at]);
    let rest = &query[insert_at..];
    out.push_str(&format!(" TOP {limit}"));
    if !rest.starts_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(rest);
    out
}

/// `<table>_backup_<YYYYmmdd_HHMMSS>` in UTC.
pub fn default_backup_name(table: &str) -> String {
    format!("{table}_backup_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Text with string literal contents blanked out, plus whether a literal was
/// left open.
fn outside_literals(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut closing: Option<char> = None;
    while let Some(c) = chars.next() {
        match closing {
            Some(']') if c == ']' && chars.peek() == Some(&']') => {
                chars.next();
                out.push_str("  ");
            }
            Some(end) if c == end => {
                closing = None;
                out.push(c);
            }
            Some(_) => out.push(' '),
            None => {
                if matches!(c, '\'' | '"') {
                    closing = Some(c);
                } else if c == '[' {
                    closing = Some(']');
                }
                out.push(c);
            }
        }
    }
    (out, closing.is_some())
}

/// Byte offset of the first character after whitespace and comments.
fn skip_trivia(text: &str, mut pos: usize) -> usize {
    let bytes = text.as_bytes();
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if text[pos..].starts_with("--") {
            pos = text[pos..].find('\n').map_or(bytes.len(), |i| pos + i + 1);
        } else if text[pos..].starts_with("/*") {
            pos = text[pos + 2..].find("*/").map_or(bytes.len(), |i| pos + 2 + i + 2);
        } else {
            return pos;
        }
    }
}

/// Matches `word` case-insensitively at `pos` on a word boundary; returns the
/// offset just past it.
fn match_word(text: &str, pos: usize, word: &str) -> Option<usize> {
    let end = pos + word.len();
    let candidate = text.get(pos..end)?;
    if !candidate.eq_ignore_ascii_case(word) {
        return None;
    }
    match text[end..].chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(end),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_drops_foreign_characters() {
        assert_eq!(
            sanitize_identifier("users]; DROP TABLE x--", "table name").unwrap(),
            "usersDROPTABLEx--"
        );
        assert_eq!(sanitize_identifier("order-items_2", "table name").unwrap(), "order-items_2");
    }

    #[test]
    fn sanitize_rejects_empty_and_long() {
        assert!(matches!(
            sanitize_identifier("[];'", "table name"),
            Err(ToolError::Validation(_))
        ));
        let long = "t".repeat(129);
        assert!(matches!(
            sanitize_identifier(&long, "table name"),
            Err(ToolError::Validation(_))
        ));
        assert!(sanitize_identifier(&"t".repeat(128), "table name").is_ok());
    }

    #[test]
    fn object_name_defaults_schema() {
        let name = ObjectName::resolve(None, "users", "table name").unwrap();
        assert_eq!(name.sql(), "[dbo].[users]");

        let name = ObjectName::resolve(Some("sales"), "orders", "table name").unwrap();
        assert_eq!(name.sql(), "[sales].[orders]");

        let name = ObjectName::resolve(Some("  "), "orders", "table name").unwrap();
        assert_eq!(name.schema, "dbo");
    }

    #[test]
    fn type_names_are_restricted() {
        assert_eq!(validate_type_name("NVARCHAR(MAX)").unwrap(), "NVARCHAR(MAX)");
        assert_eq!(validate_type_name(" DECIMAL(10, 2) ").unwrap(), "DECIMAL(10, 2)");
        assert!(validate_type_name("INT; DROP TABLE x").is_err());
        assert!(validate_type_name("VARCHAR(10)'").is_err());
        assert!(validate_type_name("").is_err());
    }

    #[test]
    fn defaults_render_as_literals() {
        assert_eq!(render_default(&json!("O'Brien")).unwrap(), "N'O''Brien'");
        assert_eq!(render_default(&json!(42)).unwrap(), "42");
        assert_eq!(render_default(&json!(true)).unwrap(), "1");
        assert_eq!(render_default(&Value::Null).unwrap(), "NULL");
        assert_eq!(render_default(&json!("getdate()")).unwrap(), "GETDATE()");
        assert!(render_default(&json!([1])).is_err());
    }

    #[test]
    fn placeholders_skip_literals() {
        let (sql, n) = bind_placeholders("a = ? AND b = '?' AND [c?] = ?", 1);
        assert_eq!(sql, "a = @P1 AND b = '?' AND [c?] = @P2");
        assert_eq!(n, 2);

        let (sql, n) = bind_placeholders("id = ?", 4);
        assert_eq!(sql, "id = @P4");
        assert_eq!(n, 1);
    }

    #[test]
    fn placeholders_skip_comments_and_escaped_brackets() {
        let (sql, n) = bind_placeholders("UPDATE t SET a = 1 -- why?", 1);
        assert_eq!(sql, "UPDATE t SET a = 1 -- why?");
        assert_eq!(n, 0);

        let (sql, n) = bind_placeholders("a = ? /* or ? */\nAND b = ?", 1);
        assert_eq!(sql, "a = @P1 /* or ? */\nAND b = @P2");
        assert_eq!(n, 2);

        let (sql, n) = bind_placeholders("[x]]?] = ?", 1);
        assert_eq!(sql, "[x]]?] = @P1");
        assert_eq!(n, 1);
    }

    #[test]
    fn bind_exact_checks_counts() {
        assert!(bind_exact("a = ? AND b = ?", 1, &[json!(1)]).is_err());
        assert_eq!(bind_exact("a = ?", 1, &[json!(1)]).unwrap(), "a = @P1");
    }

    #[test]
    fn conditions_reject_separators_and_comments() {
        assert!(validate_condition("id = ?").is_ok());
        assert!(validate_condition("name = 'a;b--c'").is_ok());
        assert!(validate_condition("   ").is_err());
        assert!(validate_condition("1=1; DROP TABLE users").is_err());
        assert!(validate_condition("1=1 -- bypass").is_err());
        assert!(validate_condition("1=1 /* c */").is_err());
        assert!(validate_condition("[a]]--] = 1").is_ok());
        assert!(validate_condition("[a]]] = 1 -- x").is_err());
    }

    #[test]
    fn row_limit_detection_is_per_word() {
        assert!(has_row_limit("select top 5 * from t"));
        assert!(has_row_limit("SELECT * FROM t ORDER BY id OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"));
        assert!(!has_row_limit("SELECT stop, topic FROM t"));
    }

    #[test]
    fn top_goes_after_select_or_distinct() {
        assert_eq!(inject_top("SELECT * FROM t", 10), "SELECT TOP 10 * FROM t");
        assert_eq!(
            inject_top("select distinct name from t", 5),
            "select distinct TOP 5 name from t"
        );
        assert_eq!(
            inject_top("/* q */ SELECT a FROM t", 3),
            "/* q */ SELECT TOP 3 a FROM t"
        );
        assert_eq!(inject_top("SELECTED FROM t", 3), "SELECTED FROM t");
        assert_eq!(inject_top("SELECT*FROM t", 5), "SELECT TOP 5 *FROM t");
    }

    #[test]
    fn backup_name_has_timestamp_suffix() {
        let name = default_backup_name("users");
        assert!(name.starts_with("users_backup_"));
        assert_eq!(name.len(), "users_backup_".len() + "YYYYmmdd_HHMMSS".len());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
