//! The shared per-session state record.
//!
//! One mutable record threaded through every node. Nodes write their
//! postconditions here; the driver snapshots it between nodes for the
//! streaming mode.

use std::collections::BTreeMap;
use std::fmt;

use quarry_core::ids::{MemoryKey, SessionId};
use quarry_core::messages::ChatMessage;
use quarry_core::rows::{FieldDef, Row};
use serde::{Deserialize, Serialize};

use crate::summarize::ResultSummary;

/// Node names, doubling as the machine's program counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    Welcome,
    SelectDataset,
    ShowTables,
    GetTask,
    FilterTask,
    ReadSchemas,
    GenerateQueries,
    GenerateQueriesRetry,
    TestQueries,
    ExecuteQueries,
    ExecuteQueriesRetry,
    GenerateReport,
    Error,
    End,
}

impl NodeName {
    /// Snake-case name, matching the serde form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::SelectDataset => "select_dataset",
            Self::ShowTables => "show_tables",
            Self::GetTask => "get_task",
            Self::FilterTask => "filter_task",
            Self::ReadSchemas => "read_schemas",
            Self::GenerateQueries => "generate_queries",
            Self::GenerateQueriesRetry => "generate_queries_retry",
            Self::TestQueries => "test_queries",
            Self::ExecuteQueries => "execute_queries",
            Self::ExecuteQueriesRetry => "execute_queries_retry",
            Self::GenerateReport => "generate_report",
            Self::Error => "error",
            Self::End => "end",
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one validation sample.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Index into `generated_queries`.
    pub query_idx: usize,
    /// Whether the sample succeeded.
    pub ok: bool,
    /// Rows the sample returned.
    pub row_count: usize,
    /// A few sample rows for observability.
    pub sample_rows: Vec<Row>,
    /// Engine error text when the sample failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one full execution.
///
/// For a successful entry exactly one of `rows` / `memory_key` is set:
/// small results stay inline, oversized ones are spilled and carry their
/// key plus a summary. A failed entry carries `error` and neither payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Index into `generated_queries`.
    pub query_idx: usize,
    /// The statement that was executed (post-repair, if repaired).
    pub sql: String,
    /// Server-side row count.
    pub row_count: usize,
    /// Column descriptors.
    pub schema: Vec<FieldDef>,
    /// Inline rows, for results under the inline limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Spill key, for oversized results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_key: Option<MemoryKey>,
    /// Summary kept in state for spilled results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ResultSummary>,
    /// Whether the server truncated the result at the row cap.
    #[serde(default)]
    pub truncated: bool,
    /// Last error, when the query ultimately failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Whether this query ultimately succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The exactly-one-of-rows-or-key invariant for successful entries;
    /// failed entries hold neither payload.
    #[must_use]
    pub fn holds_payload_invariant(&self) -> bool {
        if self.is_ok() {
            self.rows.is_some() != self.memory_key.is_some()
        } else {
            self.rows.is_none() && self.memory_key.is_none()
        }
    }
}

/// The shared state record (one per session).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisState {
    /// Session identifier, set once at init.
    pub session_id: SessionId,
    /// Warehouse project, set once at init.
    pub project_id: String,
    /// Populated by the welcome node.
    pub available_datasets: Vec<String>,
    /// Set by dataset selection.
    pub selected_dataset: Option<String>,
    /// Populated by the show-tables node.
    pub tables_in_dataset: Vec<String>,
    /// Table name → ordered field descriptors.
    pub table_schemas: BTreeMap<String, Vec<FieldDef>>,
    /// Free-form task text.
    pub user_task: Option<String>,
    /// Read-only restatement; `None` iff the filter rejected the task.
    pub filtered_task: Option<String>,
    /// Generated SQL, mutated on retry.
    pub generated_queries: Vec<String>,
    /// Sample outcomes per query.
    pub test_results: Vec<TestResult>,
    /// Full execution outcomes per query.
    pub query_results: Vec<QueryResult>,
    /// Keys of every spilled result.
    pub memory_keys: Vec<MemoryKey>,
    /// The final report.
    pub analysis_report: Option<String>,
    /// Last recoverable or terminal error, `CODE: message` form.
    pub error_message: Option<String>,
    /// SQL-generation retries taken.
    pub retry_count_gen: u32,
    /// Execution retries taken, counted independently.
    pub retry_count_exec: u32,
    /// Interactive re-asks taken (dataset selection, empty task).
    pub select_attempts: u32,
    /// Advisory program counter for observability.
    pub current_step: NodeName,
    /// Role-tagged transcript accumulated as the session progresses.
    pub messages: Vec<ChatMessage>,
}

impl AnalysisState {
    /// Fresh state positioned at the welcome node.
    #[must_use]
    pub fn new(session_id: SessionId, project_id: impl Into<String>) -> Self {
        Self {
            session_id,
            project_id: project_id.into(),
            available_datasets: Vec::new(),
            selected_dataset: None,
            tables_in_dataset: Vec::new(),
            table_schemas: BTreeMap::new(),
            user_task: None,
            filtered_task: None,
            generated_queries: Vec::new(),
            test_results: Vec::new(),
            query_results: Vec::new(),
            memory_keys: Vec::new(),
            analysis_report: None,
            error_message: None,
            retry_count_gen: 0,
            retry_count_exec: 0,
            select_attempts: 0,
            current_step: NodeName::Welcome,
            messages: Vec::new(),
        }
    }

    /// Successful execution results.
    #[must_use]
    pub fn successful_results(&self) -> Vec<&QueryResult> {
        self.query_results.iter().filter(|r| r.is_ok()).collect()
    }

    /// Whether every test in the last sample pass succeeded.
    #[must_use]
    pub fn all_tests_ok(&self) -> bool {
        !self.test_results.is_empty() && self.test_results.iter().all(|t| t.ok)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
