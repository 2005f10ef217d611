//! # Handler Executor
//!
//! Every invocation runs on its own tokio task: sync handlers on the blocking
//! pool, async handlers as a regular task. The task boundary is the fault
//! boundary, a panic comes back as a `JoinError` and is turned into
//! [`HandlerError::Panicked`].
//!
//! With a timeout configured the executor races the task against a child of
//! the parent cancellation carrying the deadline. When the deadline wins the
//! executor stops waiting and reports [`HandlerError::Timeout`]. The task is
//! not aborted; a handler that ignores its context keeps running unobserved
//! in the background.

use std::{any::Any, time::Duration};

use tokio::time::Instant;
use tracing::debug;

use super::{
    context::{CancelReason, Cancellation, HandlerContext},
    error::{HandlerError, HandlerResult},
    event::AbortFlag,
    handler::Invoke,
    registry::ResolvedHandler,
};

/// One minute, matching the default `brain.handler_timeout`.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HandlerExecutor {
    timeout: Option<Duration>,
}

impl Default for HandlerExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_TIMEOUT)
    }
}

impl HandlerExecutor {
    /// A zero timeout disables the deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: (!timeout.is_zero()).then_some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn execute(
        &self,
        handler: &ResolvedHandler,
        parent: &Cancellation,
        abort: AbortFlag,
    ) -> HandlerResult {
        let name = handler.descriptor.name;
        let cancellation = match self.timeout {
            Some(timeout) => parent.child_with_timeout(timeout),
            None => parent.child(),
        };
        let ctx = HandlerContext::new(cancellation.clone(), abort, name);
        let payload = handler.payload.clone();

        let started = Instant::now();
        let task = match &handler.descriptor.invoke {
            Invoke::Blocking(invoke) => {
                let invoke = invoke.clone();
                tokio::task::spawn_blocking(move || invoke(ctx, payload))
            }
            Invoke::Async(invoke) => tokio::spawn(invoke(ctx, payload)),
        };

        tokio::select! {
            biased;
            joined = task => match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(HandlerError::Panicked {
                    handler: name,
                    message: panic_message(err.into_panic()),
                }),
                Err(_) => Err(HandlerError::Cancelled { handler: name }),
            },
            _ = cancellation.cancelled() => {
                debug!("Stopped waiting for {} after {:?}", name, started.elapsed());
                match cancellation.reason() {
                    Some(CancelReason::DeadlineExceeded) => Err(HandlerError::Timeout {
                        handler: name,
                        timeout: self.timeout.unwrap_or_else(|| started.elapsed()),
                    }),
                    _ => Err(HandlerError::Cancelled { handler: name }),
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::*;
    use crate::brain::{event::Event, handler::HandlerDescriptor, registry::HandlerRegistry};

    #[derive(Debug, Clone)]
    struct Ping;

    fn resolve_one(descriptor: HandlerDescriptor) -> ResolvedHandler {
        let registry = HandlerRegistry::new();
        registry.insert(descriptor).unwrap();
        registry.resolve(&Event::new(Ping)).remove(0)
    }

    #[tokio::test]
    async fn test_success() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let handler = resolve_one(HandlerDescriptor::blocking(move |_: Ping| {
            flag.store(true, Ordering::SeqCst);
        }));

        HandlerExecutor::default()
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap();
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        fn boom(_: Ping) {
            panic!("boom");
        }
        let handler = resolve_one(HandlerDescriptor::blocking(boom));

        let err = HandlerExecutor::default()
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap_err();
        match err {
            HandlerError::Panicked { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_async_panic_is_contained() {
        async fn boom(_: Ping) {
            panic!("async boom {}", 1);
        }
        let handler = resolve_one(HandlerDescriptor::asynchronous(boom));

        let err = HandlerExecutor::default()
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap_err();
        match err {
            HandlerError::Panicked { message, .. } => assert_eq!(message, "async boom 1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_returned_error() {
        let handler = resolve_one(HandlerDescriptor::asynchronous(|_: Ping| async move {
            Err::<(), _>("refused")
        }));

        let err = HandlerExecutor::default()
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed { .. }));
        assert!(err.to_string().ends_with("refused"));
    }

    #[tokio::test]
    async fn test_timeout_stops_waiting() {
        let handler = resolve_one(HandlerDescriptor::asynchronous(|_: Ping| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }));

        let started = std::time::Instant::now();
        let err = HandlerExecutor::new(Duration::from_millis(50))
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_blocking_handler_timeout_stops_waiting() {
        let handler = resolve_one(HandlerDescriptor::blocking(|_: Ping| {
            std::thread::sleep(Duration::from_secs(1));
        }));

        let started = std::time::Instant::now();
        let err = HandlerExecutor::new(Duration::from_millis(50))
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_deadline() {
        let executor = HandlerExecutor::new(Duration::ZERO);
        assert_eq!(executor.timeout(), None);

        let handler = resolve_one(HandlerDescriptor::asynchronous(|_: Ping| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }));
        executor
            .execute(&handler, &Cancellation::new(), AbortFlag::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_parent_cancellation_is_not_a_timeout() {
        let handler = resolve_one(HandlerDescriptor::asynchronous(
            |ctx: HandlerContext, _: Ping| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(ctx);
            },
        ));

        let parent = Cancellation::new();
        parent.cancel();
        let err = HandlerExecutor::default()
            .execute(&handler, &parent, AbortFlag::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Cancelled { .. }));
    }
}
