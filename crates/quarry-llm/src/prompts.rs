//! Prompt catalog.
//!
//! A fixed, closed set of four named, versioned templates. New analytical
//! behaviors get new workflow nodes, not new templates. Each template
//! declares the schema its output is parsed against; parsing is strict.

use quarry_core::rows::FieldDef;
use std::collections::BTreeMap;

/// A named, versioned template.
#[derive(Clone, Copy, Debug)]
pub struct PromptTemplate {
    /// Catalog name.
    pub name: &'static str,
    /// Monotonic version, bumped on any wording change.
    pub version: u32,
    /// Template body with `{placeholder}` slots.
    pub body: &'static str,
    /// Schema hint used for the stricter reprompt (empty for free-form
    /// output).
    pub schema_hint: &'static str,
}

impl PromptTemplate {
    /// Fill the template's placeholders in order.
    fn render(&self, substitutions: &[(&str, &str)]) -> String {
        let mut out = self.body.to_owned();
        for (slot, value) in substitutions {
            out = out.replace(&format!("{{{slot}}}"), value);
        }
        out
    }
}

/// Classifies a raw task as safe/unsafe and restates it read-only.
pub const TASK_SAFETY_FILTER: PromptTemplate = PromptTemplate {
    name: "task_safety_filter",
    version: 1,
    body: "\
You are a safety filter for a read-only data-analysis system.

User task: {user_task}

Decide whether this task can be satisfied purely by reading data:
1. Reject any task that implies modifying data (INSERT, UPDATE, DELETE, \
DROP, CREATE, ALTER, TRUNCATE and similar), exporting or exfiltrating data \
outside the analysis, or touching tables outside the currently selected \
dataset.
2. If you accept, restate the task more precisely without adding any intent \
the user did not express.

Respond with JSON only:
{\"verdict\": \"accept\" | \"reject\", \"filteredTask\": \"restated task when \
accepted\", \"rejectionReason\": \"why, when rejected\"}",
    schema_hint: r#"{"verdict": "accept" | "reject", "filteredTask": "string?", "rejectionReason": "string?"}"#,
};

/// Turns a filtered task plus schemas into read-only SQL.
pub const INTENT_ANALYSIS_AND_SQL: PromptTemplate = PromptTemplate {
    name: "intent_analysis_and_sql",
    version: 1,
    body: "\
You are a data analyst and SQL expert. Based on the analysis task and the \
table schemas below, write the SQL needed to answer it.

Analysis task: {user_task}

Available tables and schemas:
{table_schemas}

Rules:
1. SELECT statements only, one statement per query.
2. Reference only tables and fields that appear in the schemas above, using \
the fully qualified `dataset.table` form.
3. Keep result sizes reasonable; add LIMIT where a full scan is not needed.
4. Each query should contribute directly to answering the task. At most \
{max_queries} queries.

Respond with JSON only:
{\"queries\": [\"SELECT ...\", ...]}",
    schema_hint: r#"{"queries": ["string", ...]}"#,
};

/// Repairs a failed statement given the engine's error text.
pub const ERROR_ANALYSIS_AND_REPAIR: PromptTemplate = PromptTemplate {
    name: "error_analysis_and_repair",
    version: 1,
    body: "\
A SQL query failed. Analyze the error and produce a corrected statement.

Failed SQL: {failed_sql}
Engine error: {error_message}

Available tables and schemas:
{table_schemas}

The corrected statement must be a single read-only SELECT (or WITH ... \
SELECT) and reference only fields present in the schemas.

Respond with JSON only:
{\"sql\": \"corrected statement\"}",
    schema_hint: r#"{"sql": "string"}"#,
};

/// Composes the final written report from per-query summaries.
pub const ANALYSIS_REPORT: PromptTemplate = PromptTemplate {
    name: "analysis_report",
    version: 1,
    body: "\
You are a data analyst writing up results for a non-technical reader.

Original request: {user_task}

Query results:
{query_results}

Write a structured markdown report with: an executive summary, key \
findings, data insights, and recommendations. Ground every claim in the \
result data above; call out anomalies or surprising patterns explicitly. \
Plain language throughout.",
    schema_hint: "",
};

/// Render the safety-filter prompt.
#[must_use]
pub fn render_safety_filter(user_task: &str) -> String {
    TASK_SAFETY_FILTER.render(&[("user_task", user_task)])
}

/// Render the SQL-synthesis prompt.
#[must_use]
pub fn render_query_synthesis(user_task: &str, schema_context: &str, max_queries: usize) -> String {
    INTENT_ANALYSIS_AND_SQL.render(&[
        ("user_task", user_task),
        ("table_schemas", schema_context),
        ("max_queries", &max_queries.to_string()),
    ])
}

/// Render the repair prompt.
#[must_use]
pub fn render_query_repair(failed_sql: &str, error_message: &str, schema_context: &str) -> String {
    ERROR_ANALYSIS_AND_REPAIR.render(&[
        ("failed_sql", failed_sql),
        ("error_message", error_message),
        ("table_schemas", schema_context),
    ])
}

/// Render the report prompt.
#[must_use]
pub fn render_report(user_task: &str, results_summary: &str) -> String {
    ANALYSIS_REPORT.render(&[
        ("user_task", user_task),
        ("query_results", results_summary),
    ])
}

/// Format schemas for inclusion in a prompt.
///
/// Tables render in the given order with a qualified-name reminder and one
/// `name (TYPE): description` line per field, mirroring what generation
/// needs to produce correct references.
#[must_use]
pub fn format_schema_context(
    dataset: &str,
    tables: &[String],
    schemas: &BTreeMap<String, Vec<FieldDef>>,
) -> String {
    let mut out = format!(
        "Dataset: {dataset}\nIn SQL, always reference tables as `{dataset}.table_name`.\n\n"
    );

    for table in tables {
        let Some(fields) = schemas.get(table) else {
            continue;
        };
        out.push_str(&format!("Table: {table}\n"));
        out.push_str(&format!("Qualified name: `{dataset}.{table}`\n"));
        out.push_str("Fields:\n");
        for field in fields {
            out.push_str(&format!("  - {} ({})", field.name, field.field_type));
            if let Some(description) = &field.description {
                out.push_str(&format!(": {description}"));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
