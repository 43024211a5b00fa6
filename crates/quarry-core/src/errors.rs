//! Error-code taxonomy.
//!
//! Every failure surfaced by an adapter or the workflow carries one of the
//! codes below. The workflow uses the code to pick a retry edge; the driver
//! uses it to render a user-visible message that names the category without
//! leaking stack traces.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable failure codes.
///
/// The set is closed: new analytical behaviors get new workflow nodes, not
/// new ad-hoc codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Transport or auth failure talking to the warehouse.
    WarehouseUnavailable,
    /// The named dataset does not exist or is not accessible.
    DatasetNotFound,
    /// A table listed in the dataset could not be described.
    TableNotFound,
    /// The safety filter rejected the user task.
    UnsafeTask,
    /// A generated SQL statement failed the read-only parse.
    UnsafeSql,
    /// The LLM returned output that failed schema parsing twice.
    LlmMalformedOutput,
    /// The warehouse rejected a statement as unparseable.
    SqlSyntax,
    /// The statement parsed but referenced unknown columns/tables or was
    /// otherwise semantically invalid.
    SqlSemantic,
    /// The per-session token budget cannot cover the next LLM call.
    BudgetExhausted,
    /// An adapter call exceeded its deadline.
    Deadline,
    /// The session was cancelled externally.
    Cancelled,
    /// Anything that does not fit the categories above.
    Internal,
}

impl ErrorCode {
    /// The wire/display form of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WarehouseUnavailable => "WAREHOUSE_UNAVAILABLE",
            Self::DatasetNotFound => "DATASET_NOT_FOUND",
            Self::TableNotFound => "TABLE_NOT_FOUND",
            Self::UnsafeTask => "UNSAFE_TASK",
            Self::UnsafeSql => "UNSAFE_SQL",
            Self::LlmMalformedOutput => "LLM_MALFORMED_OUTPUT",
            Self::SqlSyntax => "SQL_SYNTAX",
            Self::SqlSemantic => "SQL_SEMANTIC",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::Deadline => "DEADLINE",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether this code ends the session regardless of remaining retry
    /// budget.
    ///
    /// Codes that are not terminal here may still become terminal once the
    /// relevant retry counter is exhausted; that decision lives in the
    /// workflow, not in the code itself.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::UnsafeTask
                | Self::BudgetExhausted
                | Self::Cancelled
                | Self::LlmMalformedOutput
        )
    }

    /// Whether SQL repair (as opposed to full regeneration) is the right
    /// response to this code.
    #[must_use]
    pub fn is_sql_failure(self) -> bool {
        matches!(self, Self::SqlSyntax | Self::SqlSemantic)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a user-visible error line: `CODE: message`.
///
/// This is the only form in which failures reach the user; raw error chains
/// stay in the logs.
#[must_use]
pub fn user_message(code: ErrorCode, message: &str) -> String {
    format!("{}: {message}", code.as_str())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
