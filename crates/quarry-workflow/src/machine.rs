//! The node router.
//!
//! [`advance`] runs the current node and moves the program counter. Node
//! transitions are totally ordered within a session; every write to state
//! happens-before the next node's read because the machine is
//! single-threaded by construction.
//!
//! Error routing: a node's `Err` sets `error_message` and sends the machine
//! to the error sink — except cancellation, which terminates immediately
//! without running any further node (the sink could make LLM calls).

use tracing::{debug, error};

use crate::context::WorkflowContext;
use crate::nodes;
use crate::state::{AnalysisState, NodeName};

/// Literal recorded in `error_message` on cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Execute the current node and update the program counter.
///
/// Returns `true` once the machine has reached `end`. A cancel observed at
/// the node boundary terminates without executing the node.
pub async fn advance(ctx: &WorkflowContext, state: &mut AnalysisState) -> bool {
    if state.current_step == NodeName::End {
        return true;
    }

    if ctx.cancel.is_cancelled() {
        state.error_message = Some(CANCELLED_MESSAGE.to_owned());
        state.current_step = NodeName::End;
        return true;
    }

    let step = state.current_step;
    debug!(step = %step, "entering node");

    let outcome = match step {
        NodeName::Welcome => nodes::welcome(ctx, state).await,
        NodeName::SelectDataset => nodes::select_dataset(ctx, state).await,
        NodeName::ShowTables => nodes::show_tables(ctx, state).await,
        NodeName::GetTask => nodes::get_task(ctx, state).await,
        NodeName::FilterTask => nodes::filter_task(ctx, state).await,
        NodeName::ReadSchemas => nodes::read_schemas(ctx, state).await,
        NodeName::GenerateQueries => nodes::generate_queries(ctx, state).await,
        NodeName::GenerateQueriesRetry => nodes::generate_queries_retry(ctx, state).await,
        NodeName::TestQueries => nodes::test_queries(ctx, state).await,
        NodeName::ExecuteQueries => nodes::execute_queries(ctx, state).await,
        NodeName::ExecuteQueriesRetry => nodes::execute_queries_retry(ctx, state).await,
        NodeName::GenerateReport => nodes::generate_report(ctx, state).await,
        NodeName::Error => nodes::error_node(ctx, state).await,
        NodeName::End => return true,
    };

    match outcome {
        Ok(next) => {
            state.current_step = next;
        }
        Err(err) if err.code() == quarry_core::ErrorCode::Cancelled => {
            state.error_message = Some(CANCELLED_MESSAGE.to_owned());
            state.current_step = NodeName::End;
        }
        Err(err) => {
            error!(step = %step, code = %err.code(), error = %err, "node failed");
            state.error_message = Some(err.user_message());
            // the sink's own failure must not loop back into itself
            state.current_step = if step == NodeName::Error {
                NodeName::End
            } else {
                NodeName::Error
            };
        }
    }

    state.current_step == NodeName::End
}
