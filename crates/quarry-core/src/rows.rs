//! Row, field, and result-set types returned by the warehouse.
//!
//! Rows are surfaced as JSON objects keyed by column name. The field
//! descriptors mirror what columnar engines report: a name, a type string in
//! the engine's vocabulary (`STRING`, `INT64`, `FLOAT64`, `TIMESTAMP`, …), a
//! nullability mode, and an optional description.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Field nullability / repetition mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// One column descriptor in a table schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Engine type string (e.g. `INT64`, `STRING`, `TIMESTAMP`).
    pub field_type: String,
    /// Nullability mode.
    #[serde(default)]
    pub mode: FieldMode,
    /// Human description, when the warehouse has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDef {
    /// Shorthand constructor for a nullable field without a description.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: FieldMode::Nullable,
            description: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the engine type is numeric (used for descriptive statistics).
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.field_type.to_ascii_uppercase().as_str(),
            "INT64" | "INTEGER" | "FLOAT64" | "FLOAT" | "NUMERIC" | "BIGNUMERIC" | "DECIMAL"
        )
    }
}

/// A fully materialized query result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    /// Column descriptors, in select order.
    pub schema: Vec<FieldDef>,
    /// The rows, keyed by column name.
    pub rows: Vec<Row>,
    /// Server-reported row count. May exceed `rows.len()` when truncated.
    pub row_count: usize,
    /// Set when the server had more rows than the caller's cap; the rows
    /// present are then a preview, not the full result.
    #[serde(default)]
    pub truncated: bool,
}

impl RowSet {
    /// Serialized size of the row payload in bytes.
    ///
    /// Used by the spill decision; O(bytes) like all result handling.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        serde_json::to_string(&self.rows).map_or(0, |s| s.len())
    }

    /// Column names in select order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
