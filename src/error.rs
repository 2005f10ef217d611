use thiserror::Error;

use crate::adapter::AdapterError;
use crate::brain::{BrainError, RegistrationErrors};
use crate::config::ConfigError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Brain error: {0}")]
    Brain(#[from] BrainError),

    #[error("Invalid event handlers: {0}")]
    Registration(#[from] RegistrationErrors),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BotResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
