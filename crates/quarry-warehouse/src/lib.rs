//! Warehouse adapter.
//!
//! Wraps any [`WarehouseClient`] implementation with the safety and
//! reliability contract the workflow depends on:
//!
//! - every SQL string is safety-parsed **before** any network call
//! - transient transport failures retry up to 3 times with exponential
//!   backoff (base 250 ms, cap 2 s); auth failures never retry
//! - every call carries a deadline; a blown deadline gets one retry
//! - samples are capped by injecting/tightening `LIMIT`
//! - full executions are capped at a row budget, with truncation flagged

mod adapter;
mod client;
mod error;

pub use adapter::WarehouseAdapter;
pub use client::{DryRunOutcome, WarehouseClient};
pub use error::WarehouseError;
