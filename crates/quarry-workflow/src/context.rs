//! Shared collaborators handed to every node.

use std::sync::Arc;

use quarry_core::retry::RetryConfig;
use quarry_core::settings::AnalysisConfig;
use quarry_llm::{Analyst, ChatProvider, TokenBudget};
use quarry_memory::MemoryStore;
use quarry_warehouse::{WarehouseAdapter, WarehouseClient};
use tokio_util::sync::CancellationToken;

use crate::input::SessionInput;

/// Everything a node needs besides the state record.
///
/// Built once per session; the configuration is immutable from here on.
pub struct WorkflowContext {
    /// Read-only warehouse adapter (C1).
    pub warehouse: WarehouseAdapter,
    /// Typed LLM adapter (C2), sharing the session token budget.
    pub analyst: Analyst,
    /// External memory store (C3).
    pub memory: Arc<dyn MemoryStore>,
    /// User-input seam.
    pub input: Arc<dyn SessionInput>,
    /// Immutable tunables.
    pub config: AnalysisConfig,
    /// External cancel signal, observed at node boundaries (and between
    /// queries inside the execute node).
    pub cancel: CancellationToken,
}

impl WorkflowContext {
    /// Wire the adapters from their raw collaborators.
    #[must_use]
    pub fn new(
        client: Arc<dyn WarehouseClient>,
        provider: Arc<dyn ChatProvider>,
        memory: Arc<dyn MemoryStore>,
        input: Arc<dyn SessionInput>,
        config: AnalysisConfig,
    ) -> Self {
        let budget = Arc::new(TokenBudget::new(config.token_budget_session));
        let warehouse =
            WarehouseAdapter::new(client, RetryConfig::default(), config.deadline_warehouse());
        let analyst = Analyst::new(provider, budget, config.deadline_llm(), config.max_queries);
        Self {
            warehouse,
            analyst,
            memory,
            input,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// The session token budget.
    #[must_use]
    pub fn budget(&self) -> &TokenBudget {
        self.analyst.budget()
    }

    /// A handle for cancelling this session externally.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
