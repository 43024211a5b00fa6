//! Safety checks and rewrites over tokenized SQL.

use std::collections::BTreeSet;

use quarry_core::ErrorCode;

use crate::tokenizer::{tokenize, SqlToken};

/// Keywords that must never appear at parenthesis depth 0.
const FORBIDDEN_TOP_LEVEL: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "DROP", "ALTER", "TRUNCATE", "GRANT",
    "REVOKE", "CALL", "EXPORT", "LOAD",
];

/// A rejected SQL string, with the reason.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SafetyViolation {
    #[error("empty SQL statement")]
    Empty,

    #[error("expected a single statement, found {count}")]
    MultipleStatements {
        /// Number of non-empty statements found.
        count: usize,
    },

    #[error("outermost operator must be SELECT or WITH, found {first}")]
    NotSelect {
        /// The first significant token.
        first: String,
    },

    #[error("forbidden top-level keyword {keyword}")]
    ForbiddenKeyword {
        /// The offending keyword, uppercased.
        keyword: String,
    },

    #[error("query LIMIT {found} is below the sample limit {required}")]
    SampleLimitTooSmall {
        /// LIMIT already present in the query.
        found: u64,
        /// Sample row limit the caller asked for.
        required: u64,
    },
}

impl SafetyViolation {
    /// All violations surface as `UNSAFE_SQL`.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        ErrorCode::UnsafeSql
    }
}

/// Verify that `sql` is a single read-only statement.
///
/// Accepts exactly one statement (an optional trailing `;` is fine) whose
/// first keyword is `SELECT` or `WITH`, and which contains none of the
/// forbidden keywords at parenthesis depth 0. A `WITH … INSERT` is caught
/// by the depth-0 scan; `SELECT 'DELETE'` is not flagged because literal
/// content never tokenizes.
pub fn ensure_read_only(sql: &str) -> Result<(), SafetyViolation> {
    let tokens = tokenize(sql);
    let words: Vec<&SqlToken> = tokens.iter().filter(|t| !t.is_separator()).collect();

    if words.is_empty() {
        return Err(SafetyViolation::Empty);
    }

    let statements = statement_count(&tokens);
    if statements > 1 {
        return Err(SafetyViolation::MultipleStatements { count: statements });
    }

    let first = &words[0].text;
    if first != "SELECT" && first != "WITH" {
        return Err(SafetyViolation::NotSelect {
            first: first.clone(),
        });
    }

    for token in &words {
        if token.depth == 0 && FORBIDDEN_TOP_LEVEL.contains(&token.text.as_str()) {
            return Err(SafetyViolation::ForbiddenKeyword {
                keyword: token.text.clone(),
            });
        }
    }

    Ok(())
}

/// Count statements: segments between depth-0 separators that contain at
/// least one token.
fn statement_count(tokens: &[SqlToken]) -> usize {
    let mut count = 0;
    let mut current_has_tokens = false;
    for token in tokens {
        if token.is_separator() && token.depth == 0 {
            if current_has_tokens {
                count += 1;
                current_has_tokens = false;
            }
        } else if !token.is_separator() {
            current_has_tokens = true;
        }
    }
    if current_has_tokens {
        count += 1;
    }
    count
}

/// Prepare a query for sample execution under `limit` rows.
///
/// - No top-level `LIMIT`: one is appended.
/// - Existing `LIMIT` above the sample limit: tightened down to it.
/// - Existing `LIMIT` equal to the sample limit: left untouched.
/// - Existing `LIMIT` below it: rejected, so a query tuned to return fewer
///   rows than the sample window cannot masquerade as validated.
pub fn apply_sample_limit(sql: &str, limit: u64) -> Result<String, SafetyViolation> {
    let tokens = tokenize(sql);

    let existing = tokens.iter().enumerate().rev().find_map(|(i, t)| {
        if t.depth == 0 && t.text == "LIMIT" {
            let value_token = tokens.get(i + 1)?;
            let value: u64 = value_token.text.parse().ok()?;
            Some((value_token.start, value_token.end, value))
        } else {
            None
        }
    });

    match existing {
        None => {
            let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
            Ok(format!("{trimmed} LIMIT {limit}"))
        }
        Some((_, _, found)) if found < limit => {
            Err(SafetyViolation::SampleLimitTooSmall {
                found,
                required: limit,
            })
        }
        Some((_, _, found)) if found == limit => Ok(sql.to_owned()),
        Some((start, end, _)) => {
            let mut rewritten = String::with_capacity(sql.len());
            rewritten.push_str(&sql[..start]);
            rewritten.push_str(&limit.to_string());
            rewritten.push_str(&sql[end..]);
            Ok(rewritten)
        }
    }
}

/// Rewrite bare table references after `FROM`/`JOIN` to `dataset.table`
/// form.
///
/// Only names in `tables` are touched; references that already carry a dot
/// (qualified) or that are subqueries are left alone. Quoted and unquoted
/// references both come out as `` `dataset.table` ``.
#[must_use]
pub fn qualify_table_names(sql: &str, dataset: &str, tables: &[String]) -> String {
    let known: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    // (start, end, replacement) spans, collected in order
    let mut rewrites: Vec<(usize, usize, String)> = Vec::new();

    for token in tokenize(sql) {
        if token.text != "FROM" && token.text != "JOIN" {
            continue;
        }
        if let Some((start, end, name)) = table_ref_after(sql, token.end) {
            if !name.contains('.') && known.contains(name.as_str()) {
                rewrites.push((start, end, format!("`{dataset}.{name}`")));
            }
        }
    }

    if rewrites.is_empty() {
        return sql.to_owned();
    }

    let mut out = String::with_capacity(sql.len() + rewrites.len() * 8);
    let mut cursor = 0;
    for (start, end, replacement) in rewrites {
        if start < cursor {
            continue; // overlapping span from a pathological input; keep the first
        }
        out.push_str(&sql[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    out
}

/// Parse the table reference starting at/after byte `i`.
///
/// Returns the byte span of the whole reference (including backticks if
/// present) and the unquoted name. `None` when the next construct is not an
/// identifier (e.g. a subquery).
fn table_ref_after(sql: &str, mut i: usize) -> Option<(usize, usize, String)> {
    let bytes = sql.as_bytes();

    while i < bytes.len() && (bytes[i] as char).is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }

    if bytes[i] == b'`' {
        let start = i;
        let mut j = i + 1;
        while j < bytes.len() && bytes[j] != b'`' {
            j += 1;
        }
        if j >= bytes.len() {
            return None;
        }
        let name = sql[i + 1..j].to_owned();
        return Some((start, j + 1, name));
    }

    let start = i;
    let mut j = i;
    while j < bytes.len() {
        let c = bytes[j] as char;
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            j += 1;
        } else {
            break;
        }
    }
    if j == start {
        return None;
    }
    Some((start, j, sql[start..j].to_owned()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- ensure_read_only --

    #[test]
    fn plain_select_is_accepted() {
        assert!(ensure_read_only("SELECT amount FROM orders").is_ok());
        assert!(ensure_read_only("  select * from t where x > 1  ").is_ok());
    }

    #[test]
    fn with_select_is_accepted() {
        let sql = "WITH recent AS (SELECT * FROM orders WHERE ts > '2026-01-01') \
                   SELECT SUM(amount) FROM recent";
        assert!(ensure_read_only(sql).is_ok());
    }

    #[test]
    fn trailing_semicolon_is_accepted() {
        assert!(ensure_read_only("SELECT 1;").is_ok());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(ensure_read_only(""), Err(SafetyViolation::Empty));
        assert_eq!(ensure_read_only("  -- just a comment"), Err(SafetyViolation::Empty));
    }

    #[test]
    fn dml_is_rejected() {
        for sql in [
            "DELETE FROM orders WHERE ts < '2020-01-01'",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET a = 1",
            "DROP TABLE t",
            "TRUNCATE TABLE t",
            "MERGE INTO t USING s ON t.id = s.id",
            "GRANT SELECT ON t TO joe",
            "CALL my_proc()",
        ] {
            let err = ensure_read_only(sql).unwrap_err();
            assert!(
                matches!(err, SafetyViolation::NotSelect { .. }),
                "{sql} should fail the first-keyword check, got {err:?}"
            );
        }
    }

    #[test]
    fn with_wrapped_dml_is_rejected() {
        let sql = "WITH doomed AS (SELECT id FROM orders) DELETE FROM orders \
                   WHERE id IN (SELECT id FROM doomed)";
        assert_eq!(
            ensure_read_only(sql),
            Err(SafetyViolation::ForbiddenKeyword {
                keyword: "DELETE".to_owned()
            })
        );
    }

    #[test]
    fn stacked_statements_are_rejected() {
        let err = ensure_read_only("SELECT 1; DROP TABLE t").unwrap_err();
        assert_eq!(err, SafetyViolation::MultipleStatements { count: 2 });
    }

    #[test]
    fn keywords_inside_literals_and_comments_are_ignored() {
        assert!(ensure_read_only("SELECT 'DELETE FROM t' AS note FROM logs").is_ok());
        assert!(ensure_read_only("SELECT 1 -- DROP TABLE t").is_ok());
        assert!(ensure_read_only("SELECT 'a;b' FROM t").is_ok());
    }

    #[test]
    fn forbidden_keyword_in_subquery_is_caught_at_depth_zero_only() {
        // depth > 0 never legitimately holds DML either, but the contract is
        // the top-level check; inner SELECTs must not trip it
        assert!(ensure_read_only("SELECT * FROM (SELECT 1) AS sub").is_ok());
    }

    #[test]
    fn violation_code_is_unsafe_sql() {
        assert_eq!(SafetyViolation::Empty.code(), ErrorCode::UnsafeSql);
    }

    // -- apply_sample_limit --

    #[test]
    fn limit_is_appended_when_absent() {
        assert_eq!(
            apply_sample_limit("SELECT * FROM t", 10).unwrap(),
            "SELECT * FROM t LIMIT 10"
        );
    }

    #[test]
    fn trailing_semicolon_is_stripped_before_appending() {
        assert_eq!(
            apply_sample_limit("SELECT * FROM t;", 10).unwrap(),
            "SELECT * FROM t LIMIT 10"
        );
    }

    #[test]
    fn larger_limit_is_tightened() {
        assert_eq!(
            apply_sample_limit("SELECT * FROM t LIMIT 5000", 10).unwrap(),
            "SELECT * FROM t LIMIT 10"
        );
    }

    #[test]
    fn equal_limit_is_untouched() {
        let sql = "SELECT * FROM t LIMIT 10";
        assert_eq!(apply_sample_limit(sql, 10).unwrap(), sql);
    }

    #[test]
    fn smaller_limit_is_rejected() {
        assert_eq!(
            apply_sample_limit("SELECT * FROM t LIMIT 3", 10),
            Err(SafetyViolation::SampleLimitTooSmall {
                found: 3,
                required: 10
            })
        );
    }

    #[test]
    fn limit_inside_subquery_does_not_count() {
        assert_eq!(
            apply_sample_limit("SELECT * FROM (SELECT 1 LIMIT 3) s", 10).unwrap(),
            "SELECT * FROM (SELECT 1 LIMIT 3) s LIMIT 10"
        );
    }

    #[test]
    fn limit_in_a_literal_does_not_count() {
        assert_eq!(
            apply_sample_limit("SELECT 'LIMIT 3' FROM t", 10).unwrap(),
            "SELECT 'LIMIT 3' FROM t LIMIT 10"
        );
    }

    // -- qualify_table_names --

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn bare_name_gets_qualified() {
        assert_eq!(
            qualify_table_names("SELECT * FROM orders", "sales", &tables(&["orders"])),
            "SELECT * FROM `sales.orders`"
        );
    }

    #[test]
    fn quoted_bare_name_gets_qualified() {
        assert_eq!(
            qualify_table_names("SELECT * FROM `orders`", "sales", &tables(&["orders"])),
            "SELECT * FROM `sales.orders`"
        );
    }

    #[test]
    fn joins_are_qualified_too() {
        let sql = "SELECT * FROM orders o JOIN customers c ON o.cid = c.id";
        let out = qualify_table_names(sql, "sales", &tables(&["orders", "customers"]));
        assert_eq!(
            out,
            "SELECT * FROM `sales.orders` o JOIN `sales.customers` c ON o.cid = c.id"
        );
    }

    #[test]
    fn already_qualified_names_are_left_alone() {
        let sql = "SELECT * FROM sales.orders";
        assert_eq!(
            qualify_table_names(sql, "sales", &tables(&["orders"])),
            sql
        );
        let sql = "SELECT * FROM `sales.orders`";
        assert_eq!(
            qualify_table_names(sql, "sales", &tables(&["orders"])),
            sql
        );
    }

    #[test]
    fn unknown_tables_are_left_alone() {
        let sql = "SELECT * FROM mystery";
        assert_eq!(qualify_table_names(sql, "sales", &tables(&["orders"])), sql);
    }

    #[test]
    fn subqueries_are_not_table_refs() {
        let sql = "SELECT * FROM (SELECT 1) x";
        assert_eq!(qualify_table_names(sql, "sales", &tables(&["orders"])), sql);
    }

    #[test]
    fn from_inside_a_literal_is_not_rewritten() {
        let sql = "SELECT 'FROM orders' AS note FROM orders";
        assert_eq!(
            qualify_table_names(sql, "sales", &tables(&["orders"])),
            "SELECT 'FROM orders' AS note FROM `sales.orders`"
        );
    }

    #[test]
    fn qualified_rewrite_survives_the_safety_parse() {
        let out = qualify_table_names("SELECT * FROM orders", "sales", &tables(&["orders"]));
        assert!(ensure_read_only(&out).is_ok());
    }
}
