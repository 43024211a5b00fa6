//! Node implementations.
//!
//! Each node is `state → (state', next_node)`: it reads and writes the
//! shared record and names its successor. Recoverable failures route to the
//! local retry edge (gated by the counters in state); everything else
//! bubbles up as [`WorkflowError`] for the machine to send to the error
//! sink.

use quarry_core::errors::{user_message, ErrorCode};
use quarry_core::messages::ChatMessage;
use quarry_core::rows::RowSet;
use quarry_guardrails::{ensure_read_only, qualify_table_names};
use quarry_llm::prompts::format_schema_context;
use quarry_llm::{estimate_text_tokens, LlmError};
use quarry_memory::MemoryError;
use quarry_warehouse::WarehouseError;
use tracing::{debug, info, warn};

use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::input::InputError;
use crate::state::{AnalysisState, NodeName, QueryResult, TestResult};
use crate::summarize::{
    degraded_report, format_results_for_report, needs_spill, summarize,
};

/// Sample rows kept per test result.
const TEST_SAMPLE_ROWS: usize = 3;
/// Tokens reserved for the report template and completion when deciding
/// whether the prompt fits the remaining budget.
const REPORT_TOKEN_RESERVE: u64 = 2_560;

type NodeResult = Result<NodeName, WorkflowError>;

// ─────────────────────────────────────────────────────────────────────────────
// Catalog nodes
// ─────────────────────────────────────────────────────────────────────────────

/// List accessible datasets.
pub async fn welcome(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let datasets = ctx.warehouse.list_datasets(&state.project_id).await?;
    info!(count = datasets.len(), "datasets listed");
    state.messages.push(ChatMessage::system(format!(
        "Available datasets: {}",
        datasets.join(", ")
    )));
    state.available_datasets = datasets;
    Ok(NodeName::SelectDataset)
}

/// Ask the user to pick a dataset by index, re-asking (bounded) on an
/// out-of-range answer.
pub async fn select_dataset(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let datasets = state.available_datasets.clone();
    if datasets.is_empty() {
        return Err(InputError::new("no datasets are accessible in this project").into());
    }

    loop {
        if state.select_attempts >= ctx.config.select_attempts {
            return Err(InputError::new("dataset selection attempts exhausted").into());
        }
        state.select_attempts += 1;

        let idx = ctx.input.choose_dataset(&datasets).await?;
        if let Some(name) = datasets.get(idx) {
            info!(dataset = %name, "dataset selected");
            state.selected_dataset = Some(name.clone());
            return Ok(NodeName::ShowTables);
        }
        warn!(idx, count = datasets.len(), "selection out of range, re-asking");
    }
}

/// List tables in the selected dataset. An empty dataset routes back to
/// selection while attempts remain.
pub async fn show_tables(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let dataset = state
        .selected_dataset
        .clone()
        .ok_or_else(|| InputError::new("no dataset selected"))?;

    let tables = ctx.warehouse.list_tables(&dataset).await?;

    if tables.is_empty() {
        if state.select_attempts < ctx.config.select_attempts {
            warn!(dataset = %dataset, "dataset has no tables, re-selecting");
            state.error_message = Some(user_message(
                ErrorCode::DatasetNotFound,
                &format!("dataset '{dataset}' contains no tables"),
            ));
            state.selected_dataset = None;
            return Ok(NodeName::SelectDataset);
        }
        return Err(InputError::new(format!("dataset '{dataset}' contains no tables")).into());
    }

    state.messages.push(ChatMessage::system(format!(
        "Tables in {dataset}: {}",
        tables.join(", ")
    )));
    state.tables_in_dataset = tables;
    state.error_message = None;
    Ok(NodeName::GetTask)
}

/// Collect the free-form task, re-asking (bounded) on empty input.
pub async fn get_task(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    for _ in 0..ctx.config.select_attempts {
        let raw = ctx.input.describe_task().await?;
        let task = raw.trim();
        if task.is_empty() {
            warn!("empty task, re-asking");
            continue;
        }
        state.user_task = Some(task.to_owned());
        state.retry_count_gen = 0;
        state.retry_count_exec = 0;
        state.messages.push(ChatMessage::user(task));
        return Ok(NodeName::FilterTask);
    }
    Err(InputError::new("no task provided").into())
}

/// Run the safety filter. Rejection is terminal.
pub async fn filter_task(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let task = state
        .user_task
        .clone()
        .ok_or_else(|| InputError::new("no task to filter"))?;

    let verdict = ctx.analyst.classify_safety(&task).await?;

    if verdict.is_accepted() {
        // the filter never adds intent; a missing restatement falls back to
        // the raw task
        let filtered = verdict
            .filtered_task
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| task.clone());
        info!(filtered = %filtered, "task accepted");
        state
            .messages
            .push(ChatMessage::assistant(format!("Task accepted: {filtered}")));
        state.filtered_task = Some(filtered);
        Ok(NodeName::ReadSchemas)
    } else {
        let reason = verdict
            .rejection_reason
            .unwrap_or_else(|| "not specified".to_owned());
        warn!(reason = %reason, "task rejected by safety filter");
        state.filtered_task = None;
        Err(WorkflowError::UnsafeTask { reason })
    }
}

/// Read the schema of every table. A missing table propagates, it is never
/// silently omitted.
pub async fn read_schemas(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let dataset = state
        .selected_dataset
        .clone()
        .ok_or_else(|| InputError::new("no dataset selected"))?;

    for table in state.tables_in_dataset.clone() {
        let schema = ctx.warehouse.get_schema(&dataset, &table).await?;
        debug!(table = %table, fields = schema.len(), "schema read");
        let _ = state.table_schemas.insert(table, schema);
    }
    Ok(NodeName::GenerateQueries)
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation family
// ─────────────────────────────────────────────────────────────────────────────

fn schema_context(state: &AnalysisState) -> String {
    format_schema_context(
        state.selected_dataset.as_deref().unwrap_or_default(),
        &state.tables_in_dataset,
        &state.table_schemas,
    )
}

/// Route a generation-family failure: retry edge while budget remains,
/// terminal otherwise.
fn route_generation_failure(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
    code: ErrorCode,
    message: String,
) -> NodeResult {
    state.error_message = Some(user_message(code, &message));
    if state.retry_count_gen < ctx.config.max_retries_gen {
        Ok(NodeName::GenerateQueriesRetry)
    } else {
        Err(WorkflowError::RetriesExhausted {
            code,
            last_error: message,
        })
    }
}

/// Qualify, safety-parse, and record a fresh batch of queries.
fn accept_queries(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
    raw: Vec<String>,
) -> NodeResult {
    if raw.is_empty() {
        return route_generation_failure(
            ctx,
            state,
            ErrorCode::UnsafeSql,
            "the model produced no queries".to_owned(),
        );
    }

    let dataset = state.selected_dataset.clone().unwrap_or_default();
    let mut prepared = Vec::with_capacity(raw.len());

    for sql in raw {
        let sql = qualify_table_names(&sql, &dataset, &state.tables_in_dataset);
        if let Err(violation) = ensure_read_only(&sql) {
            // abort the whole batch; the retry reprompt carries the snippet
            return route_generation_failure(
                ctx,
                state,
                ErrorCode::UnsafeSql,
                format!("{violation} in generated query: {sql}"),
            );
        }
        prepared.push(sql);
    }

    info!(count = prepared.len(), "queries accepted");
    state.messages.push(ChatMessage::assistant(format!(
        "Generated {} read-only quer{}",
        prepared.len(),
        if prepared.len() == 1 { "y" } else { "ies" }
    )));
    state.generated_queries = prepared;
    state.error_message = None;
    Ok(NodeName::TestQueries)
}

/// First synthesis pass.
pub async fn generate_queries(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    state.retry_count_gen = 0;
    let task = state
        .filtered_task
        .clone()
        .ok_or_else(|| InputError::new("no filtered task"))?;
    let queries = ctx
        .analyst
        .synthesize_queries(&task, &schema_context(state))
        .await?;
    accept_queries(ctx, state, queries)
}

/// Regeneration with the prior failure in the reprompt.
pub async fn generate_queries_retry(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
) -> NodeResult {
    state.retry_count_gen += 1;
    let prior = state
        .error_message
        .clone()
        .unwrap_or_else(|| "previous attempt failed".to_owned());
    info!(retry = state.retry_count_gen, "regenerating queries");

    let task = format!(
        "{}\n\nA previous attempt failed: {prior}\nProduce corrected queries. Every \
         statement must be a single read-only SELECT (or WITH ... SELECT).",
        state.filtered_task.clone().unwrap_or_default()
    );
    let queries = ctx
        .analyst
        .synthesize_queries(&task, &schema_context(state))
        .await?;
    accept_queries(ctx, state, queries)
}

// ─────────────────────────────────────────────────────────────────────────────
// Test / execute family
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a warehouse failure is a defect of the statement itself (worth
/// regenerating/repairing) rather than an environment failure.
fn is_query_defect(err: &WarehouseError) -> bool {
    matches!(
        err.code(),
        ErrorCode::SqlSyntax | ErrorCode::SqlSemantic | ErrorCode::UnsafeSql
    )
}

/// Sample every query at the test limit. All must pass before any full
/// execution happens.
pub async fn test_queries(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    state.test_results.clear();
    let queries = state.generated_queries.clone();
    let mut last_failure: Option<(ErrorCode, String)> = None;

    for (idx, sql) in queries.iter().enumerate() {
        match ctx
            .warehouse
            .sample_execute(sql, ctx.config.sample_row_limit)
            .await
        {
            Ok(set) => {
                debug!(query = idx + 1, rows = set.rows.len(), "sample ok");
                state.test_results.push(TestResult {
                    query_idx: idx,
                    ok: true,
                    row_count: set.rows.len(),
                    sample_rows: set.rows.into_iter().take(TEST_SAMPLE_ROWS).collect(),
                    error: None,
                });
            }
            Err(err) if is_query_defect(&err) => {
                warn!(query = idx + 1, error = %err, "sample failed");
                let message = format!("query {}: {err}", idx + 1);
                last_failure = Some((err.code(), message.clone()));
                state.test_results.push(TestResult {
                    query_idx: idx,
                    ok: false,
                    row_count: 0,
                    sample_rows: Vec::new(),
                    error: Some(message),
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    match last_failure {
        None => Ok(NodeName::ExecuteQueries),
        Some((code, _)) => {
            let joined = state
                .test_results
                .iter()
                .filter_map(|t| t.error.clone())
                .collect::<Vec<_>>()
                .join("; ");
            route_generation_failure(ctx, state, code, joined)
        }
    }
}

/// Persist one successful execution, spilling if oversized.
async fn store_result(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
    query_idx: usize,
    sql: &str,
    set: RowSet,
    attempt: u32,
) -> Result<QueryResult, WorkflowError> {
    let truncated = set.truncated;
    let schema = set.schema.clone();
    let row_count = set.row_count;

    if needs_spill(&set, ctx.config.inline_row_limit, ctx.config.inline_byte_limit) {
        let summary = summarize(query_idx, &set);
        let key = spill(ctx, state, query_idx, attempt, set).await?;
        info!(query = query_idx + 1, rows = row_count, key = %key, "result spilled");
        Ok(QueryResult {
            query_idx,
            sql: sql.to_owned(),
            row_count,
            schema,
            rows: None,
            memory_key: Some(key),
            summary: Some(summary),
            truncated,
            error: None,
        })
    } else {
        Ok(QueryResult {
            query_idx,
            sql: sql.to_owned(),
            row_count,
            schema,
            rows: Some(set.rows),
            memory_key: None,
            summary: None,
            truncated,
            error: None,
        })
    }
}

/// Write rows to the memory store under the memory deadline, recording the
/// key in state.
async fn spill(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
    query_idx: usize,
    attempt: u32,
    set: RowSet,
) -> Result<quarry_core::ids::MemoryKey, WorkflowError> {
    let put = ctx
        .memory
        .put(&state.session_id, query_idx, attempt, set.schema, set.rows);
    let key = tokio::time::timeout(ctx.config.deadline_memory(), put)
        .await
        .map_err(|_| {
            WorkflowError::Memory(MemoryError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "memory store put exceeded its deadline",
            )))
        })??;
    state.memory_keys.push(key.clone());
    Ok(key)
}

/// Route an execution-family failure: repair edge while budget remains,
/// terminal otherwise.
fn route_execution_failure(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
    code: ErrorCode,
    message: String,
) -> NodeResult {
    state.error_message = Some(user_message(code, &message));
    if state.retry_count_exec < ctx.config.max_retries_exec {
        Ok(NodeName::ExecuteQueriesRetry)
    } else {
        Err(WorkflowError::RetriesExhausted {
            code,
            last_error: message,
        })
    }
}

/// Full execution of every tested query, with spill for oversized results.
pub async fn execute_queries(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    state.retry_count_exec = 0;
    state.query_results.clear();
    let queries = state.generated_queries.clone();
    let mut last_failure: Option<(ErrorCode, String)> = None;

    for (idx, sql) in queries.iter().enumerate() {
        // cancellation between queries leaves the earlier results in place
        if ctx.cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        match ctx.warehouse.execute(sql, ctx.config.exec_row_cap).await {
            Ok(set) => {
                let result = store_result(ctx, state, idx, sql, set, 0).await?;
                state.query_results.push(result);
            }
            Err(err) if is_query_defect(&err) => {
                warn!(query = idx + 1, error = %err, "execution failed");
                let message = format!("query {}: {err}", idx + 1);
                last_failure = Some((err.code(), message.clone()));
                state.query_results.push(QueryResult {
                    query_idx: idx,
                    sql: sql.clone(),
                    error: Some(message),
                    ..QueryResult::default()
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    match last_failure {
        None => {
            state.error_message = None;
            Ok(NodeName::GenerateReport)
        }
        Some((code, message)) => route_execution_failure(ctx, state, code, message),
    }
}

/// Repair and re-execute only the failed queries.
pub async fn execute_queries_retry(
    ctx: &WorkflowContext,
    state: &mut AnalysisState,
) -> NodeResult {
    state.retry_count_exec += 1;
    let context = schema_context(state);
    let failed: Vec<usize> = state
        .query_results
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.is_ok())
        .map(|(i, _)| i)
        .collect();
    info!(retry = state.retry_count_exec, failed = failed.len(), "repairing queries");

    let mut last_failure: Option<(ErrorCode, String)> = None;

    for i in failed {
        if ctx.cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        let (sql, error) = {
            let entry = &state.query_results[i];
            (
                entry.sql.clone(),
                entry.error.clone().unwrap_or_default(),
            )
        };

        let repaired = ctx.analyst.repair_query(&sql, &error, &context).await?;
        let dataset = state.selected_dataset.clone().unwrap_or_default();
        let repaired = qualify_table_names(&repaired, &dataset, &state.tables_in_dataset);

        if let Err(violation) = ensure_read_only(&repaired) {
            let message = format!("query {}: {violation}", i + 1);
            last_failure = Some((ErrorCode::UnsafeSql, message.clone()));
            state.query_results[i].sql = repaired;
            state.query_results[i].error = Some(message);
            continue;
        }

        match ctx
            .warehouse
            .execute(&repaired, ctx.config.exec_row_cap)
            .await
        {
            Ok(set) => {
                let attempt = state.retry_count_exec;
                let result = store_result(ctx, state, i, &repaired, set, attempt).await?;
                state.generated_queries[i] = repaired;
                state.query_results[i] = result;
            }
            Err(err) if is_query_defect(&err) => {
                warn!(query = i + 1, error = %err, "repaired execution failed");
                let message = format!("query {}: {err}", i + 1);
                last_failure = Some((err.code(), message.clone()));
                state.query_results[i].sql = repaired;
                state.query_results[i].error = Some(message);
            }
            Err(err) => return Err(err.into()),
        }
    }

    match last_failure {
        None => {
            state.error_message = None;
            Ok(NodeName::GenerateReport)
        }
        Some((code, message)) => route_execution_failure(ctx, state, code, message),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report and error sink
// ─────────────────────────────────────────────────────────────────────────────

/// Largest inline result by payload size, if any.
fn largest_inline(results: &[QueryResult]) -> Option<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_ok() && r.rows.is_some())
        .max_by_key(|(_, r)| {
            r.rows
                .as_ref()
                .map_or(0, |rows| serde_json::to_string(rows).map_or(0, |s| s.len()))
        })
        .map(|(i, _)| i)
}

/// Compose the written report, spilling further inline results when the
/// prompt would not fit the remaining token budget.
pub async fn generate_report(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let task = state
        .filtered_task
        .clone()
        .or_else(|| state.user_task.clone())
        .unwrap_or_default();

    let mut summaries = format_results_for_report(&state.query_results);

    // incremental budget: inline rows plus spill summaries must fit into the
    // report-prompt window; oversize results get demoted to summaries
    while estimate_text_tokens(&summaries) + REPORT_TOKEN_RESERVE > ctx.budget().remaining() {
        let Some(i) = largest_inline(&state.query_results) else {
            break;
        };
        let entry = &state.query_results[i];
        let set = RowSet {
            schema: entry.schema.clone(),
            rows: entry.rows.clone().unwrap_or_default(),
            row_count: entry.row_count,
            truncated: entry.truncated,
        };
        let query_idx = entry.query_idx;
        info!(query = query_idx + 1, "demoting inline result to summary for the report prompt");
        let summary = summarize(query_idx, &set);
        let attempt = state.retry_count_exec;
        let key = spill(ctx, state, query_idx, attempt, set).await?;
        let entry = &mut state.query_results[i];
        entry.rows = None;
        entry.memory_key = Some(key);
        entry.summary = Some(summary);
        summaries = format_results_for_report(&state.query_results);
    }

    match ctx.analyst.compose_report(&task, &summaries).await {
        Ok(text) => {
            state.messages.push(ChatMessage::assistant(text.clone()));
            state.analysis_report = Some(text);
            Ok(NodeName::End)
        }
        Err(err @ LlmError::BudgetExhausted { .. }) => {
            // degraded report from the summaries alone, no further LLM calls
            warn!("budget cannot cover the report call, degrading");
            state.analysis_report = Some(degraded_report(&task, &state.query_results));
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Terminal sink: surface the error, and still produce whatever partial
/// report the successful results allow.
pub async fn error_node(ctx: &WorkflowContext, state: &mut AnalysisState) -> NodeResult {
    let message = state
        .error_message
        .clone()
        .unwrap_or_else(|| user_message(ErrorCode::Internal, "unknown error"));
    state
        .messages
        .push(ChatMessage::system(format!("Session failed: {message}")));

    if state.analysis_report.is_none() && !state.successful_results().is_empty() {
        let task = state
            .filtered_task
            .clone()
            .or_else(|| state.user_task.clone())
            .unwrap_or_default();
        let mut summaries = format_results_for_report(&state.query_results);
        summaries.push_str(&format!("\nNote: the session ended with an error: {message}\n"));

        match ctx.analyst.compose_report(&task, &summaries).await {
            Ok(text) => state.analysis_report = Some(text),
            Err(err) => {
                warn!(error = %err, "partial report failed, degrading");
                state.analysis_report = Some(degraded_report(&task, &state.query_results));
            }
        }
    }

    Ok(NodeName::End)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
