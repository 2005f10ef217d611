use std::{fmt, time::Duration};

use thiserror::Error;

/// Boxed error accepted from handler bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum BrainError {
    #[error("Event queue is closed, the brain no longer accepts events")]
    Closed,

    #[error("Event loop already started")]
    AlreadyStarted,

    #[error("Brain is already shutting down")]
    AlreadyShuttingDown,

    #[error("Event loop stopped before acknowledging shutdown")]
    ShutdownAborted,
}

pub type BrainResult<T> = Result<T, BrainError>;

/// Failure of a single handler invocation.
///
/// None of these stop the dispatch loop; they are logged and counted and the
/// next handler runs.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Handler {handler} failed: {source}")]
    Failed {
        handler: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Handler {handler} panicked: {message}")]
    Panicked {
        handler: &'static str,
        message: String,
    },

    #[error("Handler {handler} timed out after {timeout:?}")]
    Timeout {
        handler: &'static str,
        timeout: Duration,
    },

    #[error("Handler {handler} was cancelled")]
    Cancelled { handler: &'static str },

    #[error("Handler {handler} expected payload {expected}")]
    PayloadMismatch {
        handler: &'static str,
        expected: &'static str,
    },
}

impl HandlerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HandlerError::Timeout { .. })
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, HandlerError::Panicked { .. })
    }

    pub fn handler(&self) -> &'static str {
        match self {
            HandlerError::Failed { handler, .. }
            | HandlerError::Panicked { handler, .. }
            | HandlerError::Timeout { handler, .. }
            | HandlerError::Cancelled { handler }
            | HandlerError::PayloadMismatch { handler, .. } => handler,
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// A handler or capability declaration that was rejected.
///
/// Registration never fails loudly. Rejections are appended to the brain's
/// aggregate list and checked once before the loop starts.
#[derive(Error, Debug, Clone)]
pub enum RegistrationError {
    #[error("Event handler argument cannot be a reference: {payload}")]
    ReferencePayload { payload: &'static str },

    #[error("Event handler argument cannot be a pointer: {payload}")]
    PointerPayload { payload: &'static str },

    #[error("Event handler argument must be a concrete payload type, got {payload}")]
    ErasedPayload { payload: &'static str },

    #[error("Capability {capability} already declared for {payload}")]
    DuplicateCapability {
        payload: &'static str,
        capability: &'static str,
    },

    #[error("Invalid message pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Ordered snapshot of every registration failure so far.
#[derive(Debug, Clone, Default)]
pub struct RegistrationErrors(pub Vec<RegistrationError>);

impl RegistrationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistrationError> {
        self.0.iter()
    }
}

impl fmt::Display for RegistrationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for RegistrationErrors {}
