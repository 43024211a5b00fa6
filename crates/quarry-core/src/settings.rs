//! Analysis configuration and its loader.
//!
//! All tunables are collected into one immutable [`AnalysisConfig`] handed
//! to the session driver at construction. Loading flow:
//!
//! 1. Start from compiled defaults
//! 2. If a settings file exists, deep-merge its values over the defaults
//! 3. Apply `QUARRY_*` environment overrides (highest priority)
//!
//! Deep merge rules: objects merge recursively (source wins per key),
//! arrays and primitives are replaced entirely, nulls in the source are
//! skipped.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Errors from the settings loader.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable per-session configuration.
///
/// Durations are stored as integer milliseconds for serde friendliness and
/// exposed through `Duration` accessors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Retries of the SQL-generation family after a failed attempt.
    #[serde(default = "default_max_retries_gen")]
    pub max_retries_gen: u32,
    /// Retries of the execution family, counted independently.
    #[serde(default = "default_max_retries_exec")]
    pub max_retries_exec: u32,
    /// Upper bound on queries synthesized per task.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Row cap applied to validation samples.
    #[serde(default = "default_sample_row_limit")]
    pub sample_row_limit: usize,
    /// Row cap applied to full execution.
    #[serde(default = "default_exec_row_cap")]
    pub exec_row_cap: usize,
    /// Results at or below this row count stay inline in state.
    #[serde(default = "default_inline_row_limit")]
    pub inline_row_limit: usize,
    /// Results at or below this serialized size stay inline in state.
    #[serde(default = "default_inline_byte_limit")]
    pub inline_byte_limit: usize,
    /// Aggregate cap on LLM input+output tokens per session.
    #[serde(default = "default_token_budget_session")]
    pub token_budget_session: u64,
    /// Interactive re-ask bound (dataset selection, empty task).
    #[serde(default = "default_select_attempts")]
    pub select_attempts: u32,
    /// Per-call warehouse deadline, ms.
    #[serde(default = "default_deadline_warehouse_ms")]
    pub deadline_warehouse_ms: u64,
    /// Per-call LLM deadline, ms.
    #[serde(default = "default_deadline_llm_ms")]
    pub deadline_llm_ms: u64,
    /// Per-call memory-store deadline, ms.
    #[serde(default = "default_deadline_memory_ms")]
    pub deadline_memory_ms: u64,
    /// Session wall-clock deadline, ms.
    #[serde(default = "default_deadline_session_ms")]
    pub deadline_session_ms: u64,
    /// Memory entry time-to-live, ms.
    #[serde(default = "default_memory_ttl_ms")]
    pub memory_ttl_ms: u64,
}

fn default_max_retries_gen() -> u32 {
    2
}
fn default_max_retries_exec() -> u32 {
    2
}
fn default_max_queries() -> usize {
    5
}
fn default_sample_row_limit() -> usize {
    10
}
fn default_exec_row_cap() -> usize {
    10_000
}
fn default_inline_row_limit() -> usize {
    100
}
fn default_inline_byte_limit() -> usize {
    128 * 1024
}
fn default_token_budget_session() -> u64 {
    200_000
}
fn default_select_attempts() -> u32 {
    3
}
fn default_deadline_warehouse_ms() -> u64 {
    120_000
}
fn default_deadline_llm_ms() -> u64 {
    60_000
}
fn default_deadline_memory_ms() -> u64 {
    10_000
}
fn default_deadline_session_ms() -> u64 {
    600_000
}
fn default_memory_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_retries_gen: default_max_retries_gen(),
            max_retries_exec: default_max_retries_exec(),
            max_queries: default_max_queries(),
            sample_row_limit: default_sample_row_limit(),
            exec_row_cap: default_exec_row_cap(),
            inline_row_limit: default_inline_row_limit(),
            inline_byte_limit: default_inline_byte_limit(),
            token_budget_session: default_token_budget_session(),
            select_attempts: default_select_attempts(),
            deadline_warehouse_ms: default_deadline_warehouse_ms(),
            deadline_llm_ms: default_deadline_llm_ms(),
            deadline_memory_ms: default_deadline_memory_ms(),
            deadline_session_ms: default_deadline_session_ms(),
            memory_ttl_ms: default_memory_ttl_ms(),
        }
    }
}

impl AnalysisConfig {
    #[must_use]
    pub fn deadline_warehouse(&self) -> Duration {
        Duration::from_millis(self.deadline_warehouse_ms)
    }

    #[must_use]
    pub fn deadline_llm(&self) -> Duration {
        Duration::from_millis(self.deadline_llm_ms)
    }

    #[must_use]
    pub fn deadline_memory(&self) -> Duration {
        Duration::from_millis(self.deadline_memory_ms)
    }

    #[must_use]
    pub fn deadline_session(&self) -> Duration {
        Duration::from_millis(self.deadline_session_ms)
    }

    #[must_use]
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_millis(self.memory_ttl_ms)
    }
}

/// Load configuration from an optional settings file plus env overrides.
///
/// A missing file yields the compiled defaults; an unreadable or invalid
/// file is an error.
pub fn load_config(path: &Path) -> Result<AnalysisConfig, SettingsError> {
    let defaults = serde_json::to_value(AnalysisConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading analysis settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut config: AnalysisConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `QUARRY_*` environment variable overrides.
///
/// Integers are range-checked; invalid values fall back to the file/default
/// silently.
pub fn apply_env_overrides(config: &mut AnalysisConfig) {
    if let Some(v) = read_env_u32("QUARRY_MAX_RETRIES_GEN", 0, 10) {
        config.max_retries_gen = v;
    }
    if let Some(v) = read_env_u32("QUARRY_MAX_RETRIES_EXEC", 0, 10) {
        config.max_retries_exec = v;
    }
    if let Some(v) = read_env_usize("QUARRY_MAX_QUERIES", 1, 50) {
        config.max_queries = v;
    }
    if let Some(v) = read_env_usize("QUARRY_SAMPLE_ROW_LIMIT", 1, 1_000) {
        config.sample_row_limit = v;
    }
    if let Some(v) = read_env_usize("QUARRY_EXEC_ROW_CAP", 1, 10_000_000) {
        config.exec_row_cap = v;
    }
    if let Some(v) = read_env_usize("QUARRY_INLINE_ROW_LIMIT", 1, 1_000_000) {
        config.inline_row_limit = v;
    }
    if let Some(v) = read_env_usize("QUARRY_INLINE_BYTE_LIMIT", 1, 1 << 30) {
        config.inline_byte_limit = v;
    }
    if let Some(v) = read_env_u64("QUARRY_TOKEN_BUDGET", 1_000, 100_000_000) {
        config.token_budget_session = v;
    }
    if let Some(v) = read_env_u32("QUARRY_SELECT_ATTEMPTS", 1, 20) {
        config.select_attempts = v;
    }
    if let Some(v) = read_env_u64("QUARRY_DEADLINE_WAREHOUSE_MS", 1_000, 3_600_000) {
        config.deadline_warehouse_ms = v;
    }
    if let Some(v) = read_env_u64("QUARRY_DEADLINE_LLM_MS", 1_000, 3_600_000) {
        config.deadline_llm_ms = v;
    }
    if let Some(v) = read_env_u64("QUARRY_DEADLINE_MEMORY_MS", 100, 600_000) {
        config.deadline_memory_ms = v;
    }
    if let Some(v) = read_env_u64("QUARRY_DEADLINE_SESSION_MS", 1_000, 86_400_000) {
        config.deadline_session_ms = v;
    }
    if let Some(v) = read_env_u64("QUARRY_MEMORY_TTL_MS", 1_000, 30 * 86_400_000) {
        config.memory_ttl_ms = v;
    }
}

// ── Pure parsing helpers (testable without env vars) ─────────────────────────

/// Parse a string as a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| parse_u32_range(&v, min, max))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| parse_u64_range(&v, min, max))
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| parse_usize_range(&v, min, max))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
