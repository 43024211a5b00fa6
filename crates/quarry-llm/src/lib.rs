//! Typed LLM adapter.
//!
//! The workflow never talks to a model directly; it goes through
//! [`Analyst`], which owns:
//!
//! - the [`prompts`] catalog (four versioned templates, a closed set)
//! - the per-session [`TokenBudget`] — a call whose estimated cost exceeds
//!   the remaining budget is refused before it is made
//! - strict output parsing with one stricter reprompt, after which the
//!   call fails with `LLM_MALFORMED_OUTPUT`
//! - per-call deadlines with a single retry for transient failures
//!
//! The transport itself is behind [`ChatProvider`]; implementations wrap
//! whatever completion endpoint the deployment uses.

pub mod analyst;
pub mod extract;
pub mod prompts;
pub mod provider;
pub mod tokens;

pub use analyst::{Analyst, SafetyVerdict, Verdict};
pub use provider::{ChatProvider, Completion, CompletionOptions, LlmError};
pub use tokens::{estimate_text_tokens, TokenBudget, TokenUsage};
