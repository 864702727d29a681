//! Lexical screening of caller-supplied query text.
//!
//! This is a best-effort blacklist over normalized text, not a SQL parser.
//! It rejects anything that is not plainly a single read-only `SELECT`, but a
//! determined caller can still find constructs it does not recognize.
//!
//! Known gap: `SELECT ... INTO new_table` is a `SELECT` with no forbidden
//! keyword, so it passes and creates a table even in read-only mode.

use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- QueryPolicy -----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct QueryPolicy {
    /// Whole words that may not appear anywhere in the query.
    pub forbidden_keywords: &'static [&'static str],

    /// Word prefixes that may not appear (system and extended procedures).
    pub forbidden_prefixes: &'static [&'static str],

    /// Legacy catalog views that count as system metadata.
    pub legacy_catalogs: &'static [&'static str],
}

impl QueryPolicy {
    pub const fn restricted() -> Self {
        Self {
            forbidden_keywords: &[
                "INSERT",
                "UPDATE",
                "DELETE",
                "DROP",
                "CREATE",
                "ALTER",
                "TRUNCATE",
                "MERGE",
                "EXEC",
                "EXECUTE",
                "BACKUP",
                "RESTORE",
                "BULK",
                "OPENROWSET",
                "OPENDATASOURCE",
                "OPENQUERY",
                "OPENXML",
            ],
            forbidden_prefixes: &["SP_", "XP_"],
            legacy_catalogs: &[
                "SYSOBJECTS",
                "SYSCOLUMNS",
                "SYSCOMMENTS",
                "SYSUSERS",
                "SYSLOGINS",
                "SYSDATABASES",
                "SYSINDEXES",
                "SYSXLOGINS",
            ],
        }
    }
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self::restricted()
    }
}

// -----------------------------------------------------------------------------
// ----- Classification --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Allow,
    Deny(Violation),
}

impl Classification {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Classification::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("query is empty")]
    Empty,

    #[error("only SELECT statements are allowed")]
    NotSelect,

    #[error("forbidden keyword '{0}' is not allowed")]
    ForbiddenKeyword(String),

    #[error("multiple statements are not allowed")]
    StatementStacking,

    #[error("UNION against system metadata is not allowed")]
    SystemMetadataUnion,

    #[error("system variables (@@) are not allowed")]
    SystemVariable,

    #[error("WAITFOR delays are not allowed")]
    TimeDelay,
}

// -----------------------------------------------------------------------------
// ----- Public API ------------------------------------------------------------

/// Decides whether `query` may run under `policy`. The first violation found
/// wins.
pub fn classify(query: &str, policy: &QueryPolicy) -> Classification {
    match check(query, policy) {
        Ok(()) => Classification::Allow,
        Err(violation) => Classification::Deny(violation),
    }
}

/// Comments replaced by a space, whitespace collapsed, uppercased.
pub fn normalize(query: &str) -> String {
    let stripped = strip_comments(query);
    let mut out = String::with_capacity(stripped.len());
    for word in stripped.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.to_uppercase()
}

/// First word of the normalized text, if any.
pub fn leading_keyword(query: &str) -> Option<String> {
    tokenize(&normalize(query)).into_iter().find_map(|t| match t {
        Token::Word(w) => Some(w),
        Token::Punct(_) => None,
    })
}

// -----------------------------------------------------------------------------
// ----- Internal: Checks ------------------------------------------------------

fn check(query: &str, policy: &QueryPolicy) -> Result<(), Violation> {
    if query.trim().is_empty() {
        return Err(Violation::Empty);
    }

    let cleaned = normalize(query);
    let tokens = tokenize(&cleaned);

    match tokens.first() {
        Some(Token::Word(w)) if w == "SELECT" => {}
        None => return Err(Violation::Empty),
        _ => return Err(Violation::NotSelect),
    }

    for token in &tokens {
        let Token::Word(word) = token else { continue };

        if policy.forbidden_keywords.contains(&word.as_str()) {
            return Err(Violation::ForbiddenKeyword(word.clone()));
        }
        if let Some(prefix) = policy
            .forbidden_prefixes
            .iter()
            .find(|p| word.starts_with(**p))
        {
            return Err(Violation::ForbiddenKeyword(prefix.to_string()));
        }
    }

    if stacks_select(&tokens) {
        return Err(Violation::StatementStacking);
    }
    if has_word(&tokens, "UNION") && touches_system_metadata(&tokens, policy) {
        return Err(Violation::SystemMetadataUnion);
    }
    if cleaned.contains("@@") {
        return Err(Violation::SystemVariable);
    }
    if has_word(&tokens, "WAITFOR") {
        return Err(Violation::TimeDelay);
    }

    Ok(())
}

fn stacks_select(tokens: &[Token]) -> bool {
    tokens.windows(2).any(|pair| {
        matches!(&pair[0], Token::Punct(';'))
            && matches!(&pair[1], Token::Word(w) if w == "SELECT")
    })
}

fn touches_system_metadata(tokens: &[Token], policy: &QueryPolicy) -> bool {
    tokens.iter().enumerate().any(|(i, token)| {
        let Token::Word(word) = token else {
            return false;
        };
        match word.as_str() {
            "INFORMATION_SCHEMA" => true,
            "SYS" => matches!(tokens.get(i + 1), Some(Token::Punct('.'))),
            other => policy.legacy_catalogs.contains(&other),
        }
    })
}

fn has_word(tokens: &[Token], needle: &str) -> bool {
    tokens
        .iter()
        .any(|t| matches!(t, Token::Word(w) if w == needle))
}

// -----------------------------------------------------------------------------
// ----- Internal: Lexing ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Punct(char),
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '#')
}

/// Brackets and quotes are dropped so `[sys].[objects]` reads as `SYS . OBJECTS`.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_word_char(c) {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(&mut word)));
        }
        if c.is_whitespace() || matches!(c, '[' | ']' | '"' | '\'') {
            continue;
        }
        tokens.push(Token::Punct(c));
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

/// Replaces `-- ...` (to end of line) and `/* ... */` with a single space.
/// Comment markers inside string literals or bracketed identifiers are kept.
/// `]]` inside brackets is an escaped `]` and does not close the identifier.
/// An unterminated block comment runs to the end of the text.
fn strip_comments(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut closing: Option<char> = None;

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
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
