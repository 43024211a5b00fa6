//! # Provider Trait
//!
//! Core abstraction for the completion backend. The adapter only needs a
//! chat-style call: role-tagged messages in, text out. Streaming is not
//! required at this seam; the session driver reconstructs progress at node
//! boundaries.

use async_trait::async_trait;
use quarry_core::messages::ChatMessage;
use quarry_core::ErrorCode;
use serde::{Deserialize, Serialize};

use crate::tokens::TokenUsage;

/// Errors from LLM calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport or API failure from the provider.
    #[error("provider error: {message}")]
    Provider {
        /// Error description.
        message: String,
        /// Whether a single retry is worthwhile.
        retryable: bool,
    },

    /// Authentication failure. Never retried.
    #[error("provider auth failed: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Output failed schema parsing twice (initial + stricter reprompt).
    #[error("malformed LLM output: {message}")]
    Malformed {
        /// What failed to parse.
        message: String,
    },

    /// The estimated cost of the call exceeds the remaining session budget.
    #[error("token budget exhausted: need ~{needed}, {remaining} remaining")]
    BudgetExhausted {
        /// Estimated prompt + completion tokens for the refused call.
        needed: u64,
        /// Tokens left in the session budget.
        remaining: u64,
    },

    /// The call exceeded its deadline.
    #[error("LLM call exceeded {elapsed_ms}ms deadline")]
    Deadline {
        /// Deadline that was blown, in milliseconds.
        elapsed_ms: u64,
    },

    /// The session was cancelled while a call was in flight.
    #[error("LLM call cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether one retry is worthwhile.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Deadline { .. } => true,
            Self::Auth { .. }
            | Self::Malformed { .. }
            | Self::BudgetExhausted { .. }
            | Self::Cancelled => false,
        }
    }

    /// The taxonomy code surfaced to the workflow.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Provider { .. } | Self::Auth { .. } => ErrorCode::Internal,
            Self::Malformed { .. } => ErrorCode::LlmMalformedOutput,
            Self::BudgetExhausted { .. } => ErrorCode::BudgetExhausted,
            Self::Deadline { .. } => ErrorCode::Deadline,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }
}

/// Options for a completion request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 – 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A completed response.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    /// The response text.
    pub text: String,
    /// Token accounting, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// Chat-style completion backend.
///
/// Implementors must be `Send + Sync`; the adapter holds them behind an
/// `Arc` and never issues concurrent calls within one session.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Run one completion.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Provider {
            message: "503".into(),
            retryable: true
        }
        .is_retryable());
        assert!(!LlmError::Provider {
            message: "400".into(),
            retryable: false
        }
        .is_retryable());
        assert!(LlmError::Deadline { elapsed_ms: 1 }.is_retryable());
        assert!(!LlmError::Auth { message: "x".into() }.is_retryable());
        assert!(!LlmError::Malformed { message: "x".into() }.is_retryable());
        assert!(!LlmError::BudgetExhausted {
            needed: 10,
            remaining: 1
        }
        .is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }

    #[test]
    fn codes_map_to_the_taxonomy() {
        assert_eq!(
            LlmError::Malformed { message: "x".into() }.code(),
            ErrorCode::LlmMalformedOutput
        );
        assert_eq!(
            LlmError::BudgetExhausted {
                needed: 10,
                remaining: 1
            }
            .code(),
            ErrorCode::BudgetExhausted
        );
        assert_eq!(LlmError::Deadline { elapsed_ms: 1 }.code(), ErrorCode::Deadline);
        assert_eq!(LlmError::Cancelled.code(), ErrorCode::Cancelled);
    }

    #[test]
    fn provider_trait_is_object_safe() {
        fn assert_object_safe(_: &dyn ChatProvider) {}
        let _ = assert_object_safe;
    }

    #[test]
    fn budget_error_names_both_sides() {
        let err = LlmError::BudgetExhausted {
            needed: 5_000,
            remaining: 120,
        };
        let text = err.to_string();
        assert!(text.contains("5000"));
        assert!(text.contains("120"));
    }
}
