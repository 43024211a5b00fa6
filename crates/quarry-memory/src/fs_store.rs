//! Filesystem store: one JSON file per key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quarry_core::ids::{MemoryKey, SessionId};
use quarry_core::rows::{FieldDef, Row};
use tracing::{debug, warn};

use crate::{build_key, sweep_cutoff, MemoryEntry, MemoryError, MemoryStore};

/// Durable store writing each entry to `<dir>/<key>.json`.
///
/// Entries are self-describing, so a crashed session's spills remain
/// readable on resume. Key-level atomicity comes from each key owning its
/// own file; keys are never reused.
pub struct FsMemoryStore {
    dir: PathBuf,
}

impl FsMemoryStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!(?dir, "opened filesystem memory store");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &MemoryKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn read_entry(path: &Path) -> Result<MemoryEntry, MemoryError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl MemoryStore for FsMemoryStore {
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
        let bytes = serde_json::to_vec(&entry)?;
        tokio::fs::write(self.path_for(&key), bytes).await?;
        debug!(%key, rows = entry.row_count, "spilled result to disk");
        Ok(key)
    }

    async fn get(&self, key: &MemoryKey) -> Result<MemoryEntry, MemoryError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(MemoryError::NotFound { key: key.clone() });
        }
        Self::read_entry(&path).await
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<MemoryKey>, MemoryError> {
        let prefix = format!("{session_id}-");
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json") {
                if stem.starts_with(&prefix) {
                    keys.push(MemoryKey::from(stem));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn sweep(&self, older_than: Duration) -> Result<usize, MemoryError> {
        let cutoff = sweep_cutoff(older_than);
        let mut removed = 0usize;

        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let entry = match Self::read_entry(&path).await {
                Ok(entry) => entry,
                Err(e) => {
                    // unreadable entries are swept too; they can never be served
                    warn!(?path, error = %e, "sweeping unreadable memory entry");
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                    continue;
                }
            };
            if entry.created_at < cutoff {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "swept expired memory entries");
        }
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rows() -> (Vec<FieldDef>, Vec<Row>) {
        let schema = vec![
            FieldDef::new("order_id", "INT64"),
            FieldDef::new("amount", "FLOAT64"),
        ];
        let rows = (0..3)
            .map(|i| {
                let mut row = Row::new();
                let _ = row.insert("order_id".to_owned(), json!(i));
                let _ = row.insert("amount".to_owned(), json!(10.5 * f64::from(i)));
                row
            })
            .collect();
        (schema, rows)
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_rows_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMemoryStore::new(dir.path()).unwrap();
        let session = SessionId::from("sess-1");
        let (schema, rows) = sample_rows();

        let key = store
            .put(&session, 0, 0, schema.clone(), rows.clone())
            .await
            .unwrap();
        let entry = store.get(&key).await.unwrap();

        assert_eq!(entry.schema, schema);
        assert_eq!(entry.payload, rows);
        assert_eq!(entry.row_count, 3);
        assert_eq!(entry.session_id, session);
        assert_eq!(entry.query_idx, 0);
    }

    #[tokio::test]
    async fn get_of_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMemoryStore::new(dir.path()).unwrap();
        let err = store.get(&MemoryKey::from("nope")).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMemoryStore::new(dir.path()).unwrap();
        let (schema, rows) = sample_rows();
        let mine = SessionId::from("sess-a");
        let theirs = SessionId::from("sess-b");

        let k1 = store
            .put(&mine, 0, 0, schema.clone(), rows.clone())
            .await
            .unwrap();
        let k2 = store
            .put(&mine, 1, 0, schema.clone(), rows.clone())
            .await
            .unwrap();
        let _ = store.put(&theirs, 0, 0, schema, rows).await.unwrap();

        let keys = store.list(&mine).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&k1));
        assert!(keys.contains(&k2));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMemoryStore::new(dir.path()).unwrap();
        let (schema, rows) = sample_rows();
        let session = SessionId::from("sess-1");

        let key = store.put(&session, 0, 0, schema, rows).await.unwrap();
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap(); // second delete is a no-op
        assert!(store.get(&key).await.is_err());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMemoryStore::new(dir.path()).unwrap();
        let (schema, rows) = sample_rows();
        let session = SessionId::from("sess-1");

        let old_key = store
            .put(&session, 0, 0, schema.clone(), rows.clone())
            .await
            .unwrap();
        // age the first entry by rewriting its timestamp
        let mut entry = store.get(&old_key).await.unwrap();
        entry.created_at = Utc::now() - chrono::Duration::hours(48);
        let path = dir.path().join(format!("{old_key}.json"));
        std::fs::write(&path, serde_json::to_vec(&entry).unwrap()).unwrap();

        let fresh_key = store.put(&session, 1, 0, schema, rows).await.unwrap();

        let removed = store.sweep(Duration::from_secs(24 * 60 * 60)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&old_key).await.is_err());
        assert!(store.get(&fresh_key).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_discards_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMemoryStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();
        let removed = store.sweep(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn entries_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::from("sess-1");
        let (schema, rows) = sample_rows();

        let key = {
            let store = FsMemoryStore::new(dir.path()).unwrap();
            store.put(&session, 0, 0, schema, rows).await.unwrap()
        };

        let reopened = FsMemoryStore::new(dir.path()).unwrap();
        let entry = reopened.get(&key).await.unwrap();
        assert_eq!(entry.row_count, 3);
    }
}
