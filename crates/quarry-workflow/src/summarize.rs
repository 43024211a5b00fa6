//! Spill decisions and result summaries.
//!
//! A spilled result keeps only its key and a [`ResultSummary`] in state:
//! row count, schema, descriptive statistics for numeric columns, top-k
//! values for categorical ones, and a handful of sample rows. The report
//! prompt is built from these summaries plus whatever stayed inline.

use quarry_core::rows::{Row, RowSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Values kept per categorical column.
const TOP_K: usize = 5;
/// Sample rows kept inside a summary.
const SUMMARY_SAMPLE_ROWS: usize = 5;
/// Inline rows shown in the report prompt.
const REPORT_INLINE_ROWS: usize = 5;

/// Descriptive statistics for one numeric column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericStat {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Values that were present and numeric.
    pub non_null: usize,
}

/// One categorical value with its occurrence count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopValue {
    pub value: String,
    pub count: u64,
}

/// Top-k values for one categorical column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTop {
    pub column: String,
    pub values: Vec<TopValue>,
}

/// What stays in state for a spilled result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub query_idx: usize,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub numeric_stats: Vec<NumericStat>,
    pub top_values: Vec<ColumnTop>,
    /// First few rows, for shape.
    pub sample_rows: Vec<Row>,
}

/// Whether a result must be spilled instead of kept inline.
///
/// Exactly at the limits a result stays inline; one row or byte over and it
/// spills.
#[must_use]
pub fn needs_spill(set: &RowSet, inline_row_limit: usize, inline_byte_limit: usize) -> bool {
    set.row_count > inline_row_limit || set.payload_bytes() > inline_byte_limit
}

/// Build the summary for one result.
///
/// Statistics cover the rows actually retrieved; for a truncated set that
/// is the preview the server returned.
#[must_use]
pub fn summarize(query_idx: usize, set: &RowSet) -> ResultSummary {
    let columns: Vec<String> = set.schema.iter().map(|f| f.name.clone()).collect();

    let mut numeric_stats = Vec::new();
    let mut top_values = Vec::new();

    for field in &set.schema {
        if field.is_numeric() {
            if let Some(stat) = numeric_stat(&field.name, &set.rows) {
                numeric_stats.push(stat);
            }
        } else if let Some(top) = column_top(&field.name, &set.rows) {
            top_values.push(top);
        }
    }

    ResultSummary {
        query_idx,
        row_count: set.row_count,
        columns,
        numeric_stats,
        top_values,
        sample_rows: set.rows.iter().take(SUMMARY_SAMPLE_ROWS).cloned().collect(),
    }
}

fn numeric_stat(column: &str, rows: &[Row]) -> Option<NumericStat> {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(column).and_then(Value::as_f64))
        .collect();
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(NumericStat {
        column: column.to_owned(),
        min,
        max,
        mean,
        non_null: values.len(),
    })
}

fn column_top(column: &str, rows: &[Row]) -> Option<ColumnTop> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for row in rows {
        let Some(value) = row.get(column) else { continue };
        if value.is_null() {
            continue;
        }
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        *counts.entry(rendered).or_insert(0) += 1;
    }
    if counts.is_empty() {
        return None;
    }
    let mut values: Vec<TopValue> = counts
        .into_iter()
        .map(|(value, count)| TopValue { value, count })
        .collect();
    // highest count first, value text as the tiebreak for determinism
    values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    values.truncate(TOP_K);
    Some(ColumnTop {
        column: column.to_owned(),
        values,
    })
}

/// Render one execution result for the report prompt.
#[must_use]
pub fn format_result_for_report(result: &crate::state::QueryResult) -> String {
    let mut out = format!("Query {}:\n", result.query_idx + 1);
    out.push_str(&format!("SQL: {}\n", result.sql));

    if let Some(error) = &result.error {
        out.push_str(&format!("FAILED: {error}\n"));
        return out;
    }

    out.push_str(&format!(
        "Rows: {}{}\n",
        result.row_count,
        if result.truncated { " (truncated)" } else { "" }
    ));
    out.push_str(&format!(
        "Columns: {}\n",
        result
            .schema
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));

    if let Some(summary) = &result.summary {
        out.push_str("Stored externally; summary:\n");
        for stat in &summary.numeric_stats {
            out.push_str(&format!(
                "  {}: min {:.4}, max {:.4}, mean {:.4} over {} values\n",
                stat.column, stat.min, stat.max, stat.mean, stat.non_null
            ));
        }
        for top in &summary.top_values {
            let rendered: Vec<String> = top
                .values
                .iter()
                .map(|v| format!("{} ({}x)", v.value, v.count))
                .collect();
            out.push_str(&format!("  top {}: {}\n", top.column, rendered.join(", ")));
        }
        if !summary.sample_rows.is_empty() {
            out.push_str("  sample rows:\n");
            for row in &summary.sample_rows {
                out.push_str(&format!(
                    "    {}\n",
                    serde_json::to_string(row).unwrap_or_default()
                ));
            }
        }
    } else if let Some(rows) = &result.rows {
        out.push_str("Data:\n");
        for row in rows.iter().take(REPORT_INLINE_ROWS) {
            out.push_str(&format!(
                "  {}\n",
                serde_json::to_string(row).unwrap_or_default()
            ));
        }
        if rows.len() > REPORT_INLINE_ROWS {
            out.push_str(&format!("  ... ({} rows total)\n", rows.len()));
        }
    }

    out
}

/// Render every execution result for the report prompt.
#[must_use]
pub fn format_results_for_report(results: &[crate::state::QueryResult]) -> String {
    results
        .iter()
        .map(format_result_for_report)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mechanical report used when the token budget cannot cover the LLM call:
/// per-query summaries only, no model involvement.
#[must_use]
pub fn degraded_report(user_task: &str, results: &[crate::state::QueryResult]) -> String {
    let mut out = String::from("# Analysis Summary (auto-generated)\n\n");
    out.push_str(&format!("Request: {user_task}\n\n"));
    out.push_str(
        "The session token budget could not cover a written analysis; the raw \
         per-query summaries follow.\n\n",
    );
    out.push_str(&format_results_for_report(results));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
