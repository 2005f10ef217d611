//! Cancellation contexts handed to handlers.
//!
//! A [`Cancellation`] is a cheap, cloneable token. Children observe their
//! parent's cancellation and deadline, so the executor can derive a per-call
//! deadline from whatever parent the loop is currently running under (the
//! background context, or the one supplied with a shutdown request).

use std::{sync::Arc, time::Duration};

use async_recursion::async_recursion;
use tokio::{sync::watch, time::Instant};

use super::event::AbortFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: watch::Sender<bool>,
    deadline: Option<Instant>,
    parent: Option<Cancellation>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// A root context with no deadline that is only cancelled explicitly.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), None)
    }

    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Some(self.clone()), Some(Instant::now() + timeout))
    }

    fn build(parent: Option<Cancellation>, deadline: Option<Instant>) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancelled,
                deadline,
                parent,
            }),
        }
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.send_replace(true);
    }

    /// The earliest deadline along the parent chain.
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(Cancellation::deadline);
        match (self.inner.deadline, parent) {
            (Some(own), Some(parent)) => Some(own.min(parent)),
            (own, parent) => own.or(parent),
        }
    }

    pub fn reason(&self) -> Option<CancelReason> {
        if *self.inner.cancelled.borrow() {
            return Some(CancelReason::Cancelled);
        }
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Some(CancelReason::DeadlineExceeded);
        }
        self.inner.parent.as_ref().and_then(Cancellation::reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once this context, or any ancestor, is cancelled or past its deadline.
    #[async_recursion]
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancelled.subscribe();
        let own = async move {
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        };
        let deadline = async {
            match self.inner.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        let parent = async {
            match &self.inner.parent {
                Some(parent) => parent.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = own => {}
            _ = deadline => {}
            _ = parent => {}
        }
    }
}

/// Context passed to handlers that take one as their first argument.
///
/// Besides cancellation it carries the current event's abort flag, so a
/// handler can claim an event and keep later handlers from seeing it.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    cancellation: Cancellation,
    abort: AbortFlag,
    handler: &'static str,
}

impl HandlerContext {
    pub(crate) fn new(cancellation: Cancellation, abort: AbortFlag, handler: &'static str) -> Self {
        Self {
            cancellation,
            abort,
            handler,
        }
    }

    /// Skips every remaining handler for the event currently being dispatched.
    /// Completion callbacks still run, and queued events are unaffected.
    pub fn abort_early(&self) {
        self.abort.set();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_set()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler
    }
}
