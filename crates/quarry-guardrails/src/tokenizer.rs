//! Minimal SQL tokenizer for safety classification.
//!
//! Produces word tokens and statement separators with their byte spans and
//! parenthesis depth. Content inside string literals, backtick identifiers,
//! and comments never becomes a token, which is the property the safety
//! checks depend on.

/// One significant token in a SQL string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlToken {
    /// Uppercased token text. `;` for statement separators.
    pub text: String,
    /// Byte offset of the token start in the input.
    pub start: usize,
    /// Byte offset one past the token end.
    pub end: usize,
    /// Parenthesis nesting depth at the token (0 = top level).
    pub depth: u32,
}

impl SqlToken {
    /// Whether this token is a statement separator.
    #[must_use]
    pub fn is_separator(&self) -> bool {
        self.text == ";"
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize a SQL string into word tokens and `;` separators.
///
/// Skipped entirely: `'…'` and `"…"` literals (with doubled-quote and
/// backslash escapes), `` `…` `` identifiers, `--` and `#` line comments,
/// and `/* … */` block comments. Parentheses adjust depth but are not
/// emitted. Unterminated constructs are tolerated: the rest of the input is
/// swallowed, which errs on the side of fewer tokens and therefore stricter
/// verdicts.
#[must_use]
pub fn tokenize(sql: &str) -> Vec<SqlToken> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut depth: u32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        match c {
            // line comments
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_until(bytes, i + 2, b'\n');
            }
            '#' => {
                i = skip_until(bytes, i + 1, b'\n');
            }
            // block comment
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i + 2);
            }
            // quoted regions
            '\'' | '"' => {
                i = skip_quoted(bytes, i + 1, bytes[i]);
            }
            '`' => {
                i = skip_until_past(bytes, i + 1, b'`');
            }
            '(' => {
                depth = depth.saturating_add(1);
                i += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            ';' => {
                tokens.push(SqlToken {
                    text: ";".to_owned(),
                    start: i,
                    end: i + 1,
                    depth,
                });
                i += 1;
            }
            c if is_word_char(c) => {
                let start = i;
                while i < bytes.len() && is_word_char(bytes[i] as char) {
                    i += 1;
                }
                tokens.push(SqlToken {
                    text: sql[start..i].to_ascii_uppercase(),
                    start,
                    end: i,
                    depth,
                });
            }
            _ => {
                i += 1;
            }
        }
    }

    tokens
}

/// Advance past `target`, returning the index after it (or the end).
fn skip_until(bytes: &[u8], mut i: usize, target: u8) -> usize {
    while i < bytes.len() && bytes[i] != target {
        i += 1;
    }
    i
}

fn skip_until_past(bytes: &[u8], i: usize, target: u8) -> usize {
    let at = skip_until(bytes, i, target);
    (at + 1).min(bytes.len())
}

fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Skip a quoted literal opened by `quote`, honoring backslash escapes and
/// doubled-quote escapes.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            // doubled quote is an escaped quote, not the end
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
