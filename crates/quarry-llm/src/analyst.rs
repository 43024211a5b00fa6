//! The typed analyst adapter.
//!
//! Four operations, one per catalog template. Every call is budget-gated
//! before it is made, deadline-bound, retried once on transient failure,
//! and (for the JSON-shaped templates) reprompted once with the declared
//! schema before giving up with `LLM_MALFORMED_OUTPUT`.

use std::sync::Arc;
use std::time::Duration;

use quarry_core::messages::ChatMessage;
use quarry_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::extract::parse_json_response;
use crate::prompts::{
    self, PromptTemplate, ANALYSIS_REPORT, ERROR_ANALYSIS_AND_REPAIR, INTENT_ANALYSIS_AND_SQL,
    TASK_SAFETY_FILTER,
};
use crate::provider::{ChatProvider, CompletionOptions, LlmError};
use crate::tokens::{estimate_text_tokens, TokenBudget};

// Expected completion sizes per operation, used for budget gating.
const SAFETY_COMPLETION_TOKENS: u64 = 256;
const SYNTHESIS_COMPLETION_TOKENS: u64 = 1_024;
const REPAIR_COMPLETION_TOKENS: u64 = 512;
const REPORT_COMPLETION_TOKENS: u64 = 2_048;

/// Accept/reject outcome of the safety filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
}

/// Filter-task output: the verdict plus a read-only restatement or a
/// rejection reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyVerdict {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl SafetyVerdict {
    /// Whether the task was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accept
    }
}

#[derive(Debug, Deserialize)]
struct QueriesPayload {
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RepairPayload {
    sql: String,
}

/// Typed LLM adapter for the analysis workflow.
pub struct Analyst {
    provider: Arc<dyn ChatProvider>,
    budget: Arc<TokenBudget>,
    deadline: Duration,
    max_queries: usize,
}

impl Analyst {
    /// Build an analyst over a provider, sharing the session budget.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        budget: Arc<TokenBudget>,
        deadline: Duration,
        max_queries: usize,
    ) -> Self {
        Self {
            provider,
            budget,
            deadline,
            max_queries,
        }
    }

    /// The shared session budget.
    #[must_use]
    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Classify a raw user task as safe/unsafe.
    pub async fn classify_safety(&self, user_task: &str) -> Result<SafetyVerdict, LlmError> {
        let prompt = prompts::render_safety_filter(user_task);
        self.call_json(&TASK_SAFETY_FILTER, prompt, SAFETY_COMPLETION_TOKENS)
            .await
    }

    /// Synthesize read-only SQL for a filtered task.
    ///
    /// The result is size-bounded to the configured query cap; empty
    /// entries are dropped.
    pub async fn synthesize_queries(
        &self,
        filtered_task: &str,
        schema_context: &str,
    ) -> Result<Vec<String>, LlmError> {
        let prompt =
            prompts::render_query_synthesis(filtered_task, schema_context, self.max_queries);
        let payload: QueriesPayload = self
            .call_json(&INTENT_ANALYSIS_AND_SQL, prompt, SYNTHESIS_COMPLETION_TOKENS)
            .await?;
        Ok(payload
            .queries
            .into_iter()
            .map(|q| q.trim().to_owned())
            .filter(|q| !q.is_empty())
            .take(self.max_queries)
            .collect())
    }

    /// Produce a corrected statement for a failed one.
    pub async fn repair_query(
        &self,
        failed_sql: &str,
        error_message: &str,
        schema_context: &str,
    ) -> Result<String, LlmError> {
        let prompt = prompts::render_query_repair(failed_sql, error_message, schema_context);
        let payload: RepairPayload = self
            .call_json(&ERROR_ANALYSIS_AND_REPAIR, prompt, REPAIR_COMPLETION_TOKENS)
            .await?;
        Ok(payload.sql.trim().to_owned())
    }

    /// Compose the final report from per-query summaries. Free-form output,
    /// no schema parse.
    pub async fn compose_report(
        &self,
        user_task: &str,
        results_summary: &str,
    ) -> Result<String, LlmError> {
        let prompt = prompts::render_report(user_task, results_summary);
        self.call(ANALYSIS_REPORT.name, &prompt, REPORT_COMPLETION_TOKENS)
            .await
    }

    /// One budget-gated, deadline-bound call with a single transient retry.
    async fn call(
        &self,
        op: &'static str,
        prompt: &str,
        expected_completion: u64,
    ) -> Result<String, LlmError> {
        let estimated = estimate_text_tokens(prompt) + expected_completion;
        self.budget
            .try_reserve(estimated)
            .map_err(|refused| LlmError::BudgetExhausted {
                needed: refused.needed,
                remaining: refused.remaining,
            })?;

        let messages = vec![ChatMessage::user(prompt)];
        let options = CompletionOptions::default();
        let retry = RetryConfig::single_retry();
        let mut retried = false;

        loop {
            let outcome = match tokio::time::timeout(
                self.deadline,
                self.provider.complete(&messages, &options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Deadline {
                    elapsed_ms: self.deadline.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(completion) => {
                    let actual = completion.usage.map_or_else(
                        || estimate_text_tokens(prompt) + estimate_text_tokens(&completion.text),
                        |usage| usage.total(),
                    );
                    self.budget.record(actual);
                    debug!(
                        op,
                        model = self.provider.model(),
                        tokens = actual,
                        remaining = self.budget.remaining(),
                        "LLM call complete"
                    );
                    return Ok(completion.text);
                }
                Err(err) if err.is_retryable() && !retried => {
                    retried = true;
                    metrics::counter!("llm_retries_total", "op" => op).increment(1);
                    let delay_ms = retry.delay_for(0);
                    warn!(op, error = %err, delay_ms, "LLM call failed, retrying once");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Call + strict parse, with one stricter reprompt on parse failure.
    async fn call_json<T: serde::de::DeserializeOwned>(
        &self,
        template: &PromptTemplate,
        prompt: String,
        expected_completion: u64,
    ) -> Result<T, LlmError> {
        let text = self.call(template.name, &prompt, expected_completion).await?;
        match parse_json_response::<T>(&text) {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    template = template.name,
                    error = %err,
                    "output failed schema parse, reprompting"
                );
            }
        }

        let strict = format!(
            "{prompt}\n\nYour previous response could not be parsed. Respond only with \
             JSON matching this schema, with no prose and no code fences:\n{}",
            template.schema_hint
        );
        let text = self.call(template.name, &strict, expected_completion).await?;
        parse_json_response::<T>(&text).map_err(|err| LlmError::Malformed {
            message: format!("{} output failed schema parse: {err}", template.name),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use crate::tokens::TokenUsage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Provider that plays back a scripted sequence of outcomes.
    #[derive(Default)]
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<Completion, LlmError>>>,
        prompts: Mutex<Vec<String>>,
        hang: bool,
    }

    impl ScriptedProvider {
        fn with_replies(replies: Vec<Result<Completion, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn text(text: &str) -> Result<Completion, LlmError> {
            Ok(Completion {
                text: text.to_owned(),
                usage: None,
            })
        }

        fn call_count(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn complete(
            &self,
            messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<Completion, LlmError> {
            self.prompts
                .lock()
                .push(messages.last().map(|m| m.content.clone()).unwrap_or_default());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| ScriptedProvider::text("{}"))
        }
    }

    fn analyst(provider: ScriptedProvider, budget: u64) -> (Arc<ScriptedProvider>, Analyst) {
        let provider = Arc::new(provider);
        let analyst = Analyst::new(
            provider.clone(),
            Arc::new(TokenBudget::new(budget)),
            Duration::from_millis(500),
            5,
        );
        (provider, analyst)
    }

    #[tokio::test]
    async fn safety_verdicts_parse() {
        let (_, analyst) = analyst(
            ScriptedProvider::with_replies(vec![ScriptedProvider::text(
                r#"{"verdict": "accept", "filteredTask": "sum revenue over the last 7 days"}"#,
            )]),
            100_000,
        );
        let verdict = analyst.classify_safety("total revenue last 7 days").await.unwrap();
        assert!(verdict.is_accepted());
        assert_eq!(
            verdict.filtered_task.as_deref(),
            Some("sum revenue over the last 7 days")
        );
    }

    #[tokio::test]
    async fn rejection_carries_the_reason() {
        let (_, analyst) = analyst(
            ScriptedProvider::with_replies(vec![ScriptedProvider::text(
                r#"{"verdict": "reject", "rejectionReason": "task implies deletion"}"#,
            )]),
            100_000,
        );
        let verdict = analyst
            .classify_safety("delete rows older than 2020")
            .await
            .unwrap();
        assert!(!verdict.is_accepted());
        assert_eq!(
            verdict.rejection_reason.as_deref(),
            Some("task implies deletion")
        );
    }

    #[tokio::test]
    async fn budget_refusal_prevents_the_call() {
        let (provider, analyst) = analyst(ScriptedProvider::default(), 10);
        let err = analyst.classify_safety("some long task").await.unwrap_err();
        assert!(matches!(err, LlmError::BudgetExhausted { .. }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn parse_failure_reprompts_once_with_the_schema() {
        let (provider, analyst) = analyst(
            ScriptedProvider::with_replies(vec![
                ScriptedProvider::text("Sure! Here are the queries you asked for."),
                ScriptedProvider::text(r#"{"queries": ["SELECT 1"]}"#),
            ]),
            100_000,
        );
        let queries = analyst.synthesize_queries("task", "schemas").await.unwrap();
        assert_eq!(queries, vec!["SELECT 1"]);
        assert_eq!(provider.call_count(), 2);
        let prompts = provider.prompts.lock();
        assert!(prompts[1].contains("could not be parsed"));
        assert!(prompts[1].contains(r#"{"queries""#));
    }

    #[tokio::test]
    async fn second_parse_failure_is_malformed_output() {
        let (provider, analyst) = analyst(
            ScriptedProvider::with_replies(vec![
                ScriptedProvider::text("prose"),
                ScriptedProvider::text("more prose"),
            ]),
            100_000,
        );
        let err = analyst.synthesize_queries("task", "schemas").await.unwrap_err();
        assert!(matches!(err, LlmError::Malformed { .. }));
        assert_eq!(err.code(), quarry_core::ErrorCode::LlmMalformedOutput);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn synthesis_is_bounded_and_trimmed() {
        let many: Vec<String> = (0..8).map(|i| format!("SELECT {i}  ")).collect();
        let reply = serde_json::json!({ "queries": many }).to_string();
        let (_, analyst) = analyst(
            ScriptedProvider::with_replies(vec![ScriptedProvider::text(&reply)]),
            100_000,
        );
        let queries = analyst.synthesize_queries("task", "schemas").await.unwrap();
        assert_eq!(queries.len(), 5);
        assert_eq!(queries[0], "SELECT 0");
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let (provider, analyst) = analyst(
            ScriptedProvider::with_replies(vec![
                Err(LlmError::Provider {
                    message: "503".into(),
                    retryable: true,
                }),
                ScriptedProvider::text(r#"{"sql": "SELECT 1"}"#),
            ]),
            100_000,
        );
        let sql = analyst.repair_query("SELECT x", "boom", "schemas").await.unwrap();
        assert_eq!(sql, "SELECT 1");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_immediate() {
        let (provider, analyst) = analyst(
            ScriptedProvider::with_replies(vec![Err(LlmError::Auth {
                message: "bad key".into(),
            })]),
            100_000,
        );
        let err = analyst.compose_report("task", "summaries").await.unwrap_err();
        assert!(matches!(err, LlmError::Auth { .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blown_deadline_twice_surfaces_deadline() {
        let (provider, analyst) = analyst(
            ScriptedProvider {
                hang: true,
                ..ScriptedProvider::default()
            },
            100_000,
        );
        let err = analyst.compose_report("task", "summaries").await.unwrap_err();
        assert!(matches!(err, LlmError::Deadline { .. }));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn reported_usage_is_recorded_against_the_budget() {
        let (_, analyst) = analyst(
            ScriptedProvider::with_replies(vec![Ok(Completion {
                text: "report text".into(),
                usage: Some(TokenUsage {
                    input_tokens: 400,
                    output_tokens: 100,
                }),
            })]),
            100_000,
        );
        let _ = analyst.compose_report("task", "summaries").await.unwrap();
        assert_eq!(analyst.budget().spent(), 500);
    }

    #[tokio::test]
    async fn unreported_usage_falls_back_to_the_estimate() {
        let (_, analyst) = analyst(
            ScriptedProvider::with_replies(vec![ScriptedProvider::text("a report")]),
            100_000,
        );
        let _ = analyst.compose_report("task", "summaries").await.unwrap();
        assert!(analyst.budget().spent() > 0);
    }
}
