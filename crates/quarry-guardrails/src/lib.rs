//! Read-only SQL enforcement.
//!
//! Every SQL string headed for the warehouse passes through this crate
//! first, no matter which layer produced it. The checks are syntactic and
//! conservative:
//!
//! - [`ensure_read_only`]: single statement whose outermost operator is
//!   `SELECT` (or `WITH … SELECT`), with a closed list of forbidden
//!   top-level keywords
//! - [`apply_sample_limit`]: inject or tighten a `LIMIT` for validation
//!   samples
//! - [`qualify_table_names`]: rewrite bare table references to
//!   `dataset.table` form
//!
//! Tokenization skips string literals, backtick identifiers, and both
//! comment styles, so `SELECT '; DROP TABLE x'` is read-only and
//! `SELECT 1 -- DELETE` is too.

mod sql;
mod tokenizer;

pub use sql::{apply_sample_limit, ensure_read_only, qualify_table_names, SafetyViolation};
pub use tokenizer::{tokenize, SqlToken};
