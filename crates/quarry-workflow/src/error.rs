//! Workflow error type.
//!
//! Aggregates the adapter errors and the workflow's own failure modes.
//! The machine inspects [`code`](WorkflowError::code) to pick between a
//! retry edge and the error sink; the driver renders
//! [`user_message`](WorkflowError::user_message) for the user.

use quarry_core::errors::{self, ErrorCode};
use quarry_llm::LlmError;
use quarry_memory::MemoryError;
use quarry_warehouse::WarehouseError;

use crate::input::InputError;

/// Any failure surfaced by a node.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Warehouse adapter failure.
    #[error("{0}")]
    Warehouse(#[from] WarehouseError),

    /// LLM adapter failure.
    #[error("{0}")]
    Llm(#[from] LlmError),

    /// Memory store failure.
    #[error("{0}")]
    Memory(#[from] MemoryError),

    /// The safety filter rejected the task.
    #[error("task rejected: {reason}")]
    UnsafeTask {
        /// Filter-provided reason.
        reason: String,
    },

    /// Interactive input failed or the re-ask bound was exhausted.
    #[error("{0}")]
    Input(#[from] InputError),

    /// A retry family ran out of budget; carries the last underlying error.
    #[error("retries exhausted: {last_error}")]
    RetriesExhausted {
        /// Code of the last failure in the family.
        code: ErrorCode,
        /// Its message.
        last_error: String,
    },

    /// External cancel observed.
    #[error("cancelled")]
    Cancelled,

    /// Session wall-clock deadline exceeded.
    #[error("session deadline exceeded")]
    SessionTimeout,
}

impl WorkflowError {
    /// The taxonomy code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Warehouse(e) => e.code(),
            Self::Llm(e) => e.code(),
            Self::Memory(_) | Self::Input(_) => ErrorCode::Internal,
            Self::UnsafeTask { .. } => ErrorCode::UnsafeTask,
            Self::RetriesExhausted { code, .. } => *code,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::SessionTimeout => ErrorCode::Deadline,
        }
    }

    /// User-visible rendering: `CODE: message`, never a raw error chain.
    #[must_use]
    pub fn user_message(&self) -> String {
        errors::user_message(self.code(), &self.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_pass_through_from_adapters() {
        let err = WorkflowError::from(WarehouseError::Semantic {
            message: "unknown column".into(),
        });
        assert_eq!(err.code(), ErrorCode::SqlSemantic);

        let err = WorkflowError::from(LlmError::BudgetExhausted {
            needed: 10,
            remaining: 1,
        });
        assert_eq!(err.code(), ErrorCode::BudgetExhausted);
    }

    #[test]
    fn unsafe_task_is_terminal_with_reason() {
        let err = WorkflowError::UnsafeTask {
            reason: "implies deletion".into(),
        };
        assert_eq!(err.code(), ErrorCode::UnsafeTask);
        assert!(err.code().is_terminal());
        assert_eq!(
            err.user_message(),
            "UNSAFE_TASK: task rejected: implies deletion"
        );
    }

    #[test]
    fn retries_exhausted_keeps_the_inner_code() {
        let err = WorkflowError::RetriesExhausted {
            code: ErrorCode::SqlSemantic,
            last_error: "no such column".into(),
        };
        assert_eq!(err.code(), ErrorCode::SqlSemantic);
        assert!(err.user_message().starts_with("SQL_SEMANTIC:"));
    }

    #[test]
    fn cancellation_and_timeout_codes() {
        assert_eq!(WorkflowError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(WorkflowError::SessionTimeout.code(), ErrorCode::Deadline);
    }
}
