//! Token estimation and the per-session budget.
//!
//! Estimation uses the chars/4 approximation. The budget is a hard gate:
//! [`TokenBudget::try_reserve`] is checked with the *estimated* cost before
//! any call is made, and the *actual* usage (when the provider reports it)
//! is recorded afterwards.

use parking_lot::Mutex;
use quarry_core::messages::ChatMessage;
use serde::{Deserialize, Serialize};

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens for a text blob.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn estimate_text_tokens(text: &str) -> u64 {
    text.len().div_ceil(CHARS_PER_TOKEN) as u64
}

/// Estimate tokens for a message list (content only; framing overhead is
/// inside the noise of the chars/4 approximation).
#[must_use]
pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(|m| estimate_text_tokens(&m.content)).sum()
}

/// Token accounting for one completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Input + output.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// A reservation refused for lack of budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("budget cannot cover ~{needed} tokens ({remaining} remaining)")]
pub struct BudgetExceeded {
    /// Estimated cost of the refused call.
    pub needed: u64,
    /// Tokens still available.
    pub remaining: u64,
}

/// Aggregate cap on LLM input+output tokens for one session.
///
/// Sessions are single-threaded, but the budget sits behind a lock anyway so
/// it can be shared with observers (progress reporting) without care.
#[derive(Debug)]
pub struct TokenBudget {
    limit: u64,
    spent: Mutex<u64>,
}

impl TokenBudget {
    /// A fresh budget of `limit` tokens.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            spent: Mutex::new(0),
        }
    }

    /// The configured cap.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Tokens recorded so far.
    #[must_use]
    pub fn spent(&self) -> u64 {
        *self.spent.lock()
    }

    /// Tokens still available.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.spent())
    }

    /// Refuse the call if `estimated` does not fit the remaining budget.
    ///
    /// Nothing is deducted here; the caller records actual usage after the
    /// call via [`record`](Self::record).
    pub fn try_reserve(&self, estimated: u64) -> Result<(), BudgetExceeded> {
        let remaining = self.remaining();
        if estimated > remaining {
            return Err(BudgetExceeded {
                needed: estimated,
                remaining,
            });
        }
        Ok(())
    }

    /// Record tokens actually consumed.
    pub fn record(&self, tokens: u64) {
        let mut spent = self.spent.lock();
        *spent = spent.saturating_add(tokens);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimation_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abc"), 1);
        assert_eq!(estimate_text_tokens("abcd"), 1);
        assert_eq!(estimate_text_tokens("abcde"), 2);
    }

    #[test]
    fn message_estimation_sums_content() {
        let messages = vec![
            ChatMessage::user("abcd"),     // 1
            ChatMessage::assistant("abcdefgh"), // 2
        ];
        assert_eq!(estimate_messages_tokens(&messages), 3);
    }

    #[test]
    fn usage_total_saturates() {
        let usage = TokenUsage {
            input_tokens: u64::MAX,
            output_tokens: 10,
        };
        assert_eq!(usage.total(), u64::MAX);
    }

    #[test]
    fn reserve_within_budget_succeeds() {
        let budget = TokenBudget::new(1_000);
        assert!(budget.try_reserve(1_000).is_ok());
        assert_eq!(budget.remaining(), 1_000); // reserve does not deduct
    }

    #[test]
    fn reserve_beyond_budget_is_refused() {
        let budget = TokenBudget::new(100);
        budget.record(80);
        let err = budget.try_reserve(50).unwrap_err();
        assert_eq!(err.needed, 50);
        assert_eq!(err.remaining, 20);
    }

    #[test]
    fn record_accumulates() {
        let budget = TokenBudget::new(1_000);
        budget.record(300);
        budget.record(200);
        assert_eq!(budget.spent(), 500);
        assert_eq!(budget.remaining(), 500);
    }

    #[test]
    fn overspend_saturates_to_zero_remaining() {
        let budget = TokenBudget::new(100);
        budget.record(150);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.try_reserve(1).is_err());
    }
}
