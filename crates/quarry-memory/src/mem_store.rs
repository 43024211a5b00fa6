//! Volatile in-process store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use quarry_core::ids::{MemoryKey, SessionId};
use quarry_core::rows::{FieldDef, Row};

use crate::{build_key, sweep_cutoff, MemoryEntry, MemoryError, MemoryStore};

/// Concurrent map store for tests and deployments that accept volatility.
///
/// `DashMap` gives the key-level atomicity the contract asks for; sessions
/// only ever touch their own keys anyway.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<MemoryKey, MemoryEntry>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (all sessions).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put(
        &self,
        session_id: &SessionId,
        query_idx: usize,
        attempt: u32,
        schema: Vec<FieldDef>,
        rows: Vec<Row>,
    ) -> Result<MemoryKey, MemoryError> {
        let key = build_key(session_id, query_idx, attempt);
        let entry = MemoryEntry {
            key: key.clone(),
            session_id: session_id.clone(),
            query_idx,
            attempt,
            schema,
            row_count: rows.len(),
            created_at: Utc::now(),
            payload: rows,
        };
        let _ = self.entries.insert(key.clone(), entry);
        Ok(key)
    }

    async fn get(&self, key: &MemoryKey) -> Result<MemoryEntry, MemoryError> {
        self.entries
            .get(key)
            .map(|entry| entry.clone())
            .ok_or_else(|| MemoryError::NotFound { key: key.clone() })
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<MemoryKey>, MemoryError> {
        let mut keys: Vec<MemoryKey> = self
            .entries
            .iter()
            .filter(|entry| &entry.session_id == session_id)
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        let _ = self.entries.remove(key);
        Ok(())
    }

    async fn sweep(&self, older_than: Duration) -> Result<usize, MemoryError> {
        let cutoff = sweep_cutoff(older_than);
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.created_at >= cutoff);
        Ok(before - self.entries.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
