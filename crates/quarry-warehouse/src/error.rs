//! Warehouse error type.

use quarry_core::ErrorCode;
use quarry_guardrails::SafetyViolation;

/// Errors from catalog and query operations.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Transient transport failure (connection reset, 5xx, …). Retryable.
    #[error("warehouse unavailable: {message}")]
    Transport {
        /// Error description.
        message: String,
    },

    /// Authentication/authorization failure. Never retried.
    #[error("warehouse auth failed: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// The named dataset does not exist or is not visible.
    #[error("dataset not found: {dataset}")]
    DatasetNotFound {
        /// Dataset name as requested.
        dataset: String,
    },

    /// The named table does not exist in its dataset.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Table name as requested.
        table: String,
    },

    /// The engine rejected the statement as unparseable.
    #[error("SQL syntax error: {message}")]
    Syntax {
        /// Server-reported error text.
        message: String,
    },

    /// The statement parsed but referenced unknown columns/tables or failed
    /// type checking.
    #[error("SQL semantic error: {message}")]
    Semantic {
        /// Server-reported error text.
        message: String,
    },

    /// The defense-in-depth safety parse rejected the statement before any
    /// network call.
    #[error("unsafe SQL: {0}")]
    Unsafe(#[from] SafetyViolation),

    /// The call exceeded its deadline.
    #[error("warehouse call exceeded {elapsed_ms}ms deadline")]
    Deadline {
        /// Deadline that was blown, in milliseconds.
        elapsed_ms: u64,
    },
}

impl WarehouseError {
    /// Whether the adapter's internal retry loop may reattempt this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Deadline { .. })
    }

    /// The taxonomy code surfaced to the workflow.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport { .. } | Self::Auth { .. } => ErrorCode::WarehouseUnavailable,
            Self::DatasetNotFound { .. } => ErrorCode::DatasetNotFound,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::Syntax { .. } => ErrorCode::SqlSyntax,
            Self::Semantic { .. } => ErrorCode::SqlSemantic,
            Self::Unsafe(_) => ErrorCode::UnsafeSql,
            Self::Deadline { .. } => ErrorCode::Deadline,
        }
    }

    /// Short category label for logging and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Auth { .. } => "auth",
            Self::DatasetNotFound { .. } | Self::TableNotFound { .. } => "catalog",
            Self::Syntax { .. } | Self::Semantic { .. } => "sql",
            Self::Unsafe(_) => "unsafe",
            Self::Deadline { .. } => "deadline",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
