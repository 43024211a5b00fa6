//! External memory store.
//!
//! LLM token budgets cannot accommodate raw tabular results beyond a few
//! dozen rows, so oversized intermediates are spilled here under a key and
//! only a key + summary stays in workflow state.
//!
//! Two implementations satisfy the contract:
//!
//! - [`FsMemoryStore`]: one self-describing JSON file per key; durable
//!   within (and across) sessions
//! - [`InMemoryStore`]: process-local concurrent map; volatile
//!
//! Keys embed `(session_id, query_idx, attempt)` plus a random suffix, so
//! concurrent sessions sharing one store never collide and retried
//! executions never overwrite an earlier attempt.

mod fs_store;
mod mem_store;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::ids::{MemoryKey, SessionId};
use quarry_core::rows::{FieldDef, Row};
use serde::{Deserialize, Serialize};

pub use fs_store::FsMemoryStore;
pub use mem_store::InMemoryStore;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The key has no entry (never written, deleted, or swept).
    #[error("no memory entry for key {key}")]
    NotFound {
        /// The missing key.
        key: MemoryKey,
    },

    /// Filesystem failure.
    #[error("memory store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry could not be decoded.
    #[error("memory entry corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One spilled result, self-describing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// The key this entry lives under.
    pub key: MemoryKey,
    /// Owning session.
    pub session_id: SessionId,
    /// Which generated query produced this result.
    pub query_idx: usize,
    /// Execution attempt that produced it.
    pub attempt: u32,
    /// Column descriptors of the payload.
    pub schema: Vec<FieldDef>,
    /// Row count of the payload.
    pub row_count: usize,
    /// Write timestamp, used by TTL sweeps.
    pub created_at: DateTime<Utc>,
    /// The rows themselves.
    pub payload: Vec<Row>,
}

/// Build the key for a spill: `{session}-q{idx}-a{attempt}-{rand}`.
fn build_key(session_id: &SessionId, query_idx: usize, attempt: u32) -> MemoryKey {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    MemoryKey::from_string(format!(
        "{session_id}-q{query_idx}-a{attempt}-{}",
        &suffix[..8]
    ))
}

/// The store contract.
///
/// Implementations must be safe for concurrent `put`/`get` across sessions
/// with key-level atomicity; reads are idempotent.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a result, returning its fresh key.
    async fn put(
        &self,
        session_id: &SessionId,
        query_idx: usize,
        attempt: u32,
        schema: Vec<FieldDef>,
        rows: Vec<Row>,
    ) -> Result<MemoryKey, MemoryError>;

    /// Retrieve an entry by key.
    async fn get(&self, key: &MemoryKey) -> Result<MemoryEntry, MemoryError>;

    /// Keys belonging to one session.
    async fn list(&self, session_id: &SessionId) -> Result<Vec<MemoryKey>, MemoryError>;

    /// Remove one entry. Removing a missing key is not an error.
    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError>;

    /// Delete entries older than the given age; returns how many went.
    async fn sweep(&self, older_than: Duration) -> Result<usize, MemoryError>;
}

/// Cutoff timestamp for a sweep.
fn sweep_cutoff(older_than: Duration) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());
    Utc::now() - age
}
