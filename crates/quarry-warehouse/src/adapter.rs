//! The adapter: safety parse, retry, deadlines.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use quarry_core::retry::RetryConfig;
use quarry_core::rows::{FieldDef, RowSet};
use quarry_guardrails::{apply_sample_limit, ensure_read_only};
use tracing::{debug, warn};

use crate::client::{DryRunOutcome, WarehouseClient};
use crate::error::WarehouseError;

/// Read-only warehouse adapter.
///
/// All operations are deadline-bound and retry transient failures
/// internally; callers see either a value or a classified terminal error.
/// Every statement is safety-parsed before it can touch the network.
pub struct WarehouseAdapter {
    client: Arc<dyn WarehouseClient>,
    retry: RetryConfig,
    deadline: Duration,
}

impl WarehouseAdapter {
    /// Wrap a client with explicit retry and deadline settings.
    #[must_use]
    pub fn new(client: Arc<dyn WarehouseClient>, retry: RetryConfig, deadline: Duration) -> Self {
        Self {
            client,
            retry,
            deadline,
        }
    }

    /// Wrap a client with the contract defaults (3 retries, base 250 ms,
    /// cap 2 s, 120 s deadline).
    #[must_use]
    pub fn with_defaults(client: Arc<dyn WarehouseClient>) -> Self {
        Self::new(client, RetryConfig::default(), Duration::from_secs(120))
    }

    /// Datasets visible inside the project.
    pub async fn list_datasets(&self, project_id: &str) -> Result<Vec<String>, WarehouseError> {
        self.with_retry("list_datasets", || self.client.list_datasets(project_id))
            .await
    }

    /// Tables inside a dataset.
    pub async fn list_tables(&self, dataset: &str) -> Result<Vec<String>, WarehouseError> {
        self.with_retry("list_tables", || self.client.list_tables(dataset))
            .await
    }

    /// Ordered field descriptors for one table.
    pub async fn get_schema(
        &self,
        dataset: &str,
        table: &str,
    ) -> Result<Vec<FieldDef>, WarehouseError> {
        self.with_retry("get_schema", || self.client.get_schema(dataset, table))
            .await
    }

    /// Server-side validation without touching data.
    pub async fn dry_run(&self, sql: &str) -> Result<DryRunOutcome, WarehouseError> {
        ensure_read_only(sql)?;
        self.with_retry("dry_run", || self.client.dry_run(sql)).await
    }

    /// Execute a statement capped to a small sample window.
    ///
    /// A `LIMIT` is injected (or tightened) to `limit`; a query that already
    /// carries a smaller `LIMIT` is rejected per the validation contract.
    pub async fn sample_execute(&self, sql: &str, limit: usize) -> Result<RowSet, WarehouseError> {
        ensure_read_only(sql)?;
        let capped = apply_sample_limit(sql, limit as u64)?;
        debug!(limit, "running sample query");
        self.with_retry("sample_execute", || self.client.query(&capped, limit))
            .await
    }

    /// Execute a statement with a row cap.
    ///
    /// `truncated = true` on the returned set means the server had more than
    /// `max_rows` rows and the caller must treat the rows as a preview.
    pub async fn execute(&self, sql: &str, max_rows: usize) -> Result<RowSet, WarehouseError> {
        ensure_read_only(sql)?;
        self.with_retry("execute", || self.client.query(sql, max_rows))
            .await
    }

    /// Run `call` under the deadline, retrying transient failures.
    ///
    /// Transport errors retry up to `retry.max_retries` times with backoff;
    /// a blown deadline gets exactly one retry; everything else returns
    /// immediately.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        mut call: F,
    ) -> Result<T, WarehouseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WarehouseError>>,
    {
        let mut transport_attempts = 0u32;
        let mut deadline_attempts = 0u32;

        loop {
            let outcome = match tokio::time::timeout(self.deadline, call()).await {
                Ok(result) => result,
                Err(_) => Err(WarehouseError::Deadline {
                    elapsed_ms: self.deadline.as_millis() as u64,
                }),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            let budget_left = match &err {
                WarehouseError::Deadline { .. } => {
                    deadline_attempts += 1;
                    deadline_attempts <= 1
                }
                _ => {
                    transport_attempts += 1;
                    transport_attempts <= self.retry.max_retries
                }
            };
            if !budget_left {
                return Err(err);
            }

            metrics::counter!("warehouse_retries_total", "category" => err.category())
                .increment(1);

            let backoff_attempt = (transport_attempts + deadline_attempts).saturating_sub(1);
            let delay_ms = self.retry.delay_for(backoff_attempt);
            warn!(
                op,
                category = err.category(),
                error = %err,
                delay_ms,
                "warehouse call failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use quarry_core::ErrorCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scriptable client: fails the first `fail_times` calls with a
    /// transport error, optionally hangs, and records every query.
    #[derive(Default)]
    struct ScriptedClient {
        fail_times: AtomicU32,
        auth_fail: bool,
        hang: bool,
        calls: AtomicU32,
        captured_sql: Mutex<Vec<(String, usize)>>,
        truncated: bool,
    }

    impl ScriptedClient {
        fn flaky(fail_times: u32) -> Self {
            Self {
                fail_times: AtomicU32::new(fail_times),
                ..Self::default()
            }
        }

        fn rows(&self) -> RowSet {
            let mut row = quarry_core::rows::Row::new();
            let _ = row.insert("n".to_owned(), json!(1));
            RowSet {
                schema: vec![FieldDef::new("n", "INT64")],
                rows: vec![row],
                row_count: 1,
                truncated: self.truncated,
            }
        }

        fn gate(&self) -> Result<(), WarehouseError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_fail {
                return Err(WarehouseError::Auth {
                    message: "token expired".into(),
                });
            }
            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                let _ = self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(WarehouseError::Transport {
                    message: "connection reset".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl WarehouseClient for ScriptedClient {
        async fn list_datasets(&self, _project_id: &str) -> Result<Vec<String>, WarehouseError> {
            if self.hang {
                let _ = self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.gate()?;
            Ok(vec!["sales".to_owned(), "ops".to_owned()])
        }

        async fn list_tables(&self, _dataset: &str) -> Result<Vec<String>, WarehouseError> {
            self.gate()?;
            Ok(vec!["orders".to_owned()])
        }

        async fn get_schema(
            &self,
            _dataset: &str,
            _table: &str,
        ) -> Result<Vec<FieldDef>, WarehouseError> {
            self.gate()?;
            Ok(vec![FieldDef::new("amount", "FLOAT64")])
        }

        async fn dry_run(&self, _sql: &str) -> Result<DryRunOutcome, WarehouseError> {
            self.gate()?;
            Ok(DryRunOutcome {
                valid: true,
                bytes_estimate: 1024,
                error: None,
            })
        }

        async fn query(&self, sql: &str, max_rows: usize) -> Result<RowSet, WarehouseError> {
            self.gate()?;
            self.captured_sql.lock().push((sql.to_owned(), max_rows));
            Ok(self.rows())
        }
    }

    fn adapter(client: ScriptedClient) -> (Arc<ScriptedClient>, WarehouseAdapter) {
        let client = Arc::new(client);
        let adapter = WarehouseAdapter::new(
            client.clone(),
            RetryConfig::default(),
            Duration::from_millis(200),
        );
        (client, adapter)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (client, adapter) = adapter(ScriptedClient::flaky(2));
        let datasets = adapter.list_datasets("proj").await.unwrap();
        assert_eq!(datasets, vec!["sales", "ops"]);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_after_the_configured_budget() {
        let (client, adapter) = adapter(ScriptedClient::flaky(10));
        let err = adapter.list_datasets("proj").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WarehouseUnavailable);
        // initial try + 3 retries
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_are_never_retried() {
        let (client, adapter) = adapter(ScriptedClient {
            auth_fail: true,
            ..ScriptedClient::default()
        });
        let err = adapter.list_datasets("proj").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WarehouseUnavailable);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blown_deadline_gets_exactly_one_retry() {
        let (client, adapter) = adapter(ScriptedClient {
            hang: true,
            ..ScriptedClient::default()
        });
        let err = adapter.list_datasets("proj").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Deadline);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsafe_sql_never_reaches_the_client() {
        let (client, adapter) = adapter(ScriptedClient::default());
        let err = adapter.execute("DROP TABLE orders", 100).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsafeSql);
        let err = adapter
            .sample_execute("DELETE FROM orders", 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsafeSql);
        let err = adapter.dry_run("TRUNCATE TABLE orders").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsafeSql);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sample_injects_the_limit() {
        let (client, adapter) = adapter(ScriptedClient::default());
        let _ = adapter
            .sample_execute("SELECT * FROM orders", 10)
            .await
            .unwrap();
        let captured = client.captured_sql.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "SELECT * FROM orders LIMIT 10");
        assert_eq!(captured[0].1, 10);
    }

    #[tokio::test]
    async fn sample_rejects_a_smaller_existing_limit() {
        let (client, adapter) = adapter(ScriptedClient::default());
        let err = adapter
            .sample_execute("SELECT * FROM orders LIMIT 2", 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsafeSql);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execute_passes_truncation_through() {
        let (_, adapter) = adapter(ScriptedClient {
            truncated: true,
            ..ScriptedClient::default()
        });
        let set = adapter.execute("SELECT * FROM orders", 100).await.unwrap();
        assert!(set.truncated);
    }

    #[tokio::test]
    async fn dry_run_surfaces_the_estimate() {
        let (_, adapter) = adapter(ScriptedClient::default());
        let outcome = adapter.dry_run("SELECT 1").await.unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.bytes_estimate, 1024);
    }
}
