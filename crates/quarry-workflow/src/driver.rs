//! Session driver.
//!
//! Two modes over the same machine:
//!
//! - [`SessionDriver::run`]: block until termination, return the final
//!   state
//! - [`SessionDriver::stream`]: yield a [`StepUpdate`] after each node so a
//!   front-end can render progress
//!
//! Both observe the external cancel token at node boundaries and enforce
//! the session wall-clock deadline.

use std::time::Instant;

use futures::Stream;
use quarry_core::errors::{user_message, ErrorCode};
use quarry_core::ids::SessionId;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::WorkflowContext;
use crate::machine;
use crate::state::{AnalysisState, NodeName};

/// One progress record in streaming mode.
#[derive(Clone, Debug)]
pub struct StepUpdate {
    /// The node that just ran (or was about to run when the session ended).
    pub step: NodeName,
    /// Top-level state fields changed by the step, as a JSON object.
    pub state_delta: Value,
}

/// Runs the machine to completion.
pub struct SessionDriver {
    ctx: WorkflowContext,
    project_id: String,
}

impl SessionDriver {
    #[must_use]
    pub fn new(ctx: WorkflowContext, project_id: impl Into<String>) -> Self {
        Self {
            ctx,
            project_id: project_id.into(),
        }
    }

    /// A handle for cancelling this session from outside.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancellation_token()
    }

    /// The wired collaborators (useful for inspecting the budget).
    #[must_use]
    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    /// Blocking mode: run the graph to termination and return the final
    /// state.
    pub async fn run(&self) -> AnalysisState {
        let session_id = SessionId::new();
        info!(session_id = %session_id, "session starting");
        let mut state = AnalysisState::new(session_id, self.project_id.clone());
        let started = Instant::now();

        loop {
            if self.enforce_session_deadline(started, &mut state) {
                break;
            }
            if machine::advance(&self.ctx, &mut state).await {
                break;
            }
        }

        info!(
            session_id = %state.session_id,
            step = %state.current_step,
            tokens_spent = self.ctx.budget().spent(),
            "session finished"
        );
        state
    }

    /// Streaming mode: yield `{step, state_delta}` after each node
    /// transition. The final update carries the terminal delta.
    pub fn stream(&self) -> impl Stream<Item = StepUpdate> + '_ {
        async_stream::stream! {
            let session_id = SessionId::new();
            info!(session_id = %session_id, "session starting (streamed)");
            let mut state = AnalysisState::new(session_id, self.project_id.clone());
            let started = Instant::now();

            loop {
                let step = state.current_step;
                let before = serde_json::to_value(&state).unwrap_or(Value::Null);

                let deadline_hit = self.enforce_session_deadline(started, &mut state);
                let finished =
                    deadline_hit || machine::advance(&self.ctx, &mut state).await;

                let after = serde_json::to_value(&state).unwrap_or(Value::Null);
                yield StepUpdate {
                    step,
                    state_delta: state_delta(&before, &after),
                };

                if finished {
                    break;
                }
            }
        }
    }

    /// Force termination once the wall clock runs out. Returns `true` when
    /// the deadline tripped.
    fn enforce_session_deadline(&self, started: Instant, state: &mut AnalysisState) -> bool {
        if state.current_step == NodeName::End {
            return true;
        }
        if started.elapsed() < self.ctx.config.deadline_session() {
            return false;
        }
        warn!(session_id = %state.session_id, "session wall-clock deadline exceeded");
        state.error_message = Some(user_message(
            ErrorCode::Deadline,
            "session wall-clock deadline exceeded",
        ));
        state.current_step = NodeName::End;
        true
    }
}

/// Top-level fields of `after` that differ from `before`.
fn state_delta(before: &Value, after: &Value) -> Value {
    let (Value::Object(before_map), Value::Object(after_map)) = (before, after) else {
        return after.clone();
    };
    let mut delta = serde_json::Map::new();
    for (key, after_val) in after_map {
        if before_map.get(key) != Some(after_val) {
            let _ = delta.insert(key.clone(), after_val.clone());
        }
    }
    Value::Object(delta)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_contains_only_changed_fields() {
        let before = json!({"a": 1, "b": "x", "c": [1, 2]});
        let after = json!({"a": 1, "b": "y", "c": [1, 2]});
        let delta = state_delta(&before, &after);
        assert_eq!(delta, json!({"b": "y"}));
    }

    #[test]
    fn delta_includes_new_fields() {
        let before = json!({"a": 1});
        let after = json!({"a": 1, "d": true});
        assert_eq!(state_delta(&before, &after), json!({"d": true}));
    }

    #[test]
    fn delta_of_identical_states_is_empty() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        let delta = state_delta(&v, &v);
        assert_eq!(delta, json!({}));
    }

    #[test]
    fn non_object_states_fall_back_to_full_snapshot() {
        let delta = state_delta(&Value::Null, &json!(42));
        assert_eq!(delta, json!(42));
    }
}
