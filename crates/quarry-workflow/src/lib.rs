//! The analysis workflow engine.
//!
//! A deterministic state machine coordinates the warehouse, the LLM, and
//! the external memory store through a shared [`AnalysisState`]:
//!
//! ```text
//! welcome → select_dataset → show_tables → get_task → filter_task
//!        → read_schemas → generate_queries ⇄ generate_queries_retry
//!        → test_queries → execute_queries ⇄ execute_queries_retry
//!        → generate_report → end
//! ```
//!
//! Retry edges are local: a generation failure re-enters generation with
//! the error in the reprompt; an execution failure goes through repair and
//! re-executes only the failed queries. The two counters are independent
//! and live in state, not in the call stack.
//!
//! The [`SessionDriver`] runs the machine to completion either blocking or
//! as a step stream, is cancellation-aware at node boundaries, and
//! enforces the session wall-clock deadline.

pub mod context;
pub mod driver;
pub mod error;
pub mod input;
pub mod machine;
pub mod nodes;
pub mod state;
pub mod summarize;

pub use context::WorkflowContext;
pub use driver::{SessionDriver, StepUpdate};
pub use error::WorkflowError;
pub use input::{InputError, SessionInput};
pub use state::{AnalysisState, NodeName, QueryResult, TestResult};
pub use summarize::ResultSummary;
