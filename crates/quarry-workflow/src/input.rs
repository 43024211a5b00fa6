//! User-input seam.
//!
//! The presentation layer (terminal, HTTP, chat bot) is outside the core;
//! the workflow only needs two answers from it. Implementations decide how
//! to ask.

use async_trait::async_trait;

/// Input-side failure (closed stream, disconnected client, …).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("input unavailable: {message}")]
pub struct InputError {
    /// What went wrong.
    pub message: String,
}

impl InputError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The two questions the workflow asks the user.
#[async_trait]
pub trait SessionInput: Send + Sync {
    /// Pick a dataset by zero-based index from the listed names.
    ///
    /// The workflow validates the index and re-asks (bounded) on an
    /// out-of-range answer, so implementations can pass raw input through.
    async fn choose_dataset(&self, datasets: &[String]) -> Result<usize, InputError>;

    /// The free-form analysis task.
    async fn describe_task(&self) -> Result<String, InputError>;
}
