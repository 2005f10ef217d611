//! Chat adapters translate an outside conversation into brain events and
//! deliver the bot's answers back.

mod cli;

pub use cli::CliAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::brain::{Brain, BrainError};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Adapter is closed")]
    Closed,

    #[error("Adapter already closed")]
    AlreadyClosed,

    #[error("Adapter already registered at a brain")]
    AlreadyRegistered,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Brain error: {0}")]
    Brain(#[from] BrainError),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Subscribes to lifecycle events and starts emitting
    /// [`ReceiveMessageEvent`](crate::brain::ReceiveMessageEvent)s.
    async fn register_at(&self, brain: &Arc<Brain>) -> AdapterResult<()>;

    /// Delivers `text`. What `channel` means is up to the adapter.
    async fn send(&self, text: &str, channel: &str) -> AdapterResult<()>;

    /// Releases the adapter. A second call fails with
    /// [`AdapterError::AlreadyClosed`].
    async fn close(&self) -> AdapterResult<()>;
}
