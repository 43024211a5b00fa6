//! Client trait implemented by warehouse SDK bindings.

use async_trait::async_trait;
use quarry_core::rows::{FieldDef, RowSet};
use serde::{Deserialize, Serialize};

use crate::error::WarehouseError;

/// Outcome of a server-side validation pass that touches no data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunOutcome {
    /// Whether the statement validated.
    pub valid: bool,
    /// Estimated bytes the statement would scan.
    pub bytes_estimate: u64,
    /// Server error text when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The raw warehouse surface the adapter wraps.
///
/// Implementations talk to a real engine (or a test double) and report
/// failures through [`WarehouseError`] so the adapter can classify them for
/// retry. Implementors must be `Send + Sync`; the adapter holds them behind
/// an `Arc`.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Datasets visible inside `project_id`.
    async fn list_datasets(&self, project_id: &str) -> Result<Vec<String>, WarehouseError>;

    /// Tables inside a dataset.
    async fn list_tables(&self, dataset: &str) -> Result<Vec<String>, WarehouseError>;

    /// Ordered field descriptors for one table.
    async fn get_schema(&self, dataset: &str, table: &str)
        -> Result<Vec<FieldDef>, WarehouseError>;

    /// Validate a statement server-side without reading data.
    async fn dry_run(&self, sql: &str) -> Result<DryRunOutcome, WarehouseError>;

    /// Run a statement, returning at most `max_rows` rows.
    ///
    /// When the full result exceeds `max_rows`, the returned [`RowSet`] has
    /// `truncated = true` and `row_count` reflects the server-side total.
    async fn query(&self, sql: &str, max_rows: usize) -> Result<RowSet, WarehouseError>;
}
