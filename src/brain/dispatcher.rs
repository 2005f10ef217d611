//! # Dispatch Loop
//!
//! [`Brain`] owns the queue, the registry, and the executor. Producers call
//! [`Brain::emit`] from any task; exactly one task runs
//! [`Brain::handle_events`], so no two events are ever dispatched at once.
//!
//! ```text
//! Idle -> Initializing -> Running -> Draining -> Terminated
//! ```
//!
//! `Init` is dispatched before the first queued event. A shutdown request
//! closes intake, the loop keeps dispatching whatever was already queued, then
//! dispatches `Shutdown`, publishes `Terminated`, and acknowledges the caller.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn};

use super::{
    context::Cancellation,
    error::{BrainError, BrainResult, RegistrationError, RegistrationErrors},
    event::Event,
    events::{InitEvent, ShutdownEvent},
    executor::HandlerExecutor,
    handler::{AsyncHandler, Handler, HandlerDescriptor},
    queue::{event_queue, EventReceiver, EventSender},
    registry::HandlerRegistry,
    stats::{BrainStats, StatsRecorder},
};
use crate::config::BrainConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BrainState {
    /// Constructed, loop not started yet.
    Idle,
    Initializing,
    Running,
    /// Intake closed, queued events still being dispatched.
    Draining,
    Terminated,
}

#[derive(Debug)]
struct ShutdownRequest {
    cancellation: Cancellation,
    ack: oneshot::Sender<()>,
}

/// Everything only the loop may touch, handed over once.
struct LoopParts {
    events: EventReceiver,
    shutdown: mpsc::Receiver<ShutdownRequest>,
    state: watch::Sender<BrainState>,
}

pub struct Brain {
    sender: EventSender,
    registry: HandlerRegistry,
    executor: HandlerExecutor,
    registration_errors: Mutex<Vec<RegistrationError>>,
    shutdown_tx: mpsc::Sender<ShutdownRequest>,
    shutdown_requested: AtomicBool,
    loop_parts: Mutex<Option<LoopParts>>,
    state: watch::Receiver<BrainState>,
    stats: StatsRecorder,
}

impl Default for Brain {
    fn default() -> Self {
        Self::new()
    }
}

impl Brain {
    pub fn new() -> Self {
        Self::with_config(&BrainConfig::default())
    }

    pub fn with_config(config: &BrainConfig) -> Self {
        let (sender, events) = event_queue();
        let (shutdown_tx, shutdown) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(BrainState::Idle);

        Self {
            sender,
            registry: HandlerRegistry::new(),
            executor: HandlerExecutor::new(config.handler_timeout),
            registration_errors: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_requested: AtomicBool::new(false),
            loop_parts: Mutex::new(Some(LoopParts {
                events,
                shutdown,
                state: state_tx,
            })),
            state,
            stats: StatsRecorder::default(),
        }
    }

    /// Registers a sync handler. It runs on the blocking pool.
    ///
    /// Invalid handlers are recorded, not returned; see
    /// [`Brain::check_registrations`].
    pub fn register<M, H>(&self, handler: H)
    where
        M: 'static,
        H: Handler<M>,
    {
        self.insert(HandlerDescriptor::blocking(handler));
    }

    pub fn register_async<M, H>(&self, handler: H)
    where
        M: 'static,
        H: AsyncHandler<M>,
    {
        self.insert(HandlerDescriptor::asynchronous(handler));
    }

    fn insert(&self, descriptor: HandlerDescriptor) {
        if let Err(err) = self.registry.insert(descriptor) {
            self.record_registration_error(err);
        }
    }

    /// Declares that `E` payloads also satisfy capability `C`, so handlers
    /// taking `Arc<C>` receive them.
    ///
    /// `C` must be spelled exactly as the handlers spell it. A view declared
    /// as `dyn Named` is not delivered to a handler taking
    /// `Arc<dyn Named + Send + Sync>`; put the auto traits on the trait
    /// itself (`trait Named: Send + Sync`) and name it bare on both sides.
    ///
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # use botty::brain::Brain;
    /// trait Named: Send + Sync {
    ///     fn name(&self) -> &str;
    /// }
    ///
    /// struct Join(String);
    /// impl Named for Join {
    ///     fn name(&self) -> &str {
    ///         &self.0
    ///     }
    /// }
    ///
    /// let brain = Brain::new();
    /// brain.declare_capability::<Join, dyn Named, _>(|join| join);
    /// brain.register(|named: Arc<dyn Named>| println!("{}", named.name()));
    /// ```
    pub fn declare_capability<E, C, F>(&self, cast: F)
    where
        E: Any + Send + Sync,
        C: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) -> Arc<C> + Send + Sync + 'static,
    {
        if let Err(err) = self.registry.declare_capability::<E, C, F>(cast) {
            self.record_registration_error(err);
        }
    }

    pub fn record_registration_error(&self, err: RegistrationError) {
        warn!("Rejected registration: {}", err);
        self.registration_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }

    pub fn registration_errors(&self) -> RegistrationErrors {
        RegistrationErrors(
            self.registration_errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        )
    }

    /// Fails with every recorded registration error, in order.
    pub fn check_registrations(&self) -> Result<(), RegistrationErrors> {
        let errors = self.registration_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn emit<E: Any + Send + Sync>(&self, payload: E) -> BrainResult<()> {
        self.emit_event(Event::new(payload))
    }

    /// Queues a prepared event, usually one carrying completion callbacks.
    pub fn emit_event(&self, event: Event) -> BrainResult<()> {
        debug!("Emit {}", event.type_name());
        self.sender.enqueue(event)
    }

    pub fn state(&self) -> BrainState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BrainState> {
        self.state.clone()
    }

    pub fn pending_events(&self) -> usize {
        self.sender.pending()
    }

    pub fn stats(&self) -> BrainStats {
        self.stats.snapshot()
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.executor.timeout()
    }

    pub fn handler_count(&self) -> usize {
        self.registry.handler_count()
    }

    /// Runs the dispatch loop until a shutdown request has been fully served.
    ///
    /// Only one call per brain may run; later calls fail with
    /// [`BrainError::AlreadyStarted`].
    pub async fn handle_events(&self) -> BrainResult<()> {
        let mut parts = self
            .loop_parts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BrainError::AlreadyStarted)?;

        parts.state.send_replace(BrainState::Initializing);
        let mut parent = Cancellation::new();
        self.handle_event(Event::new(InitEvent), &parent).await;

        parts.state.send_replace(BrainState::Running);
        info!("Brain is running");

        let mut pending: Option<ShutdownRequest> = None;
        loop {
            tokio::select! {
                biased;
                Some(request) = parts.shutdown.recv(), if pending.is_none() => {
                    debug!("Shutdown requested, draining {} events", self.sender.pending());
                    parts.events.close();
                    parent = request.cancellation.clone();
                    pending = Some(request);
                    parts.state.send_replace(BrainState::Draining);
                }
                event = parts.events.next() => match event {
                    Some(event) => self.handle_event(event, &parent).await,
                    None => break,
                },
            }
        }

        self.handle_event(Event::new(ShutdownEvent), &parent).await;
        parts.state.send_replace(BrainState::Terminated);

        if let Some(request) = pending {
            if request.ack.send(()).is_err() {
                debug!("Shutdown requester went away before the acknowledgement");
            }
        }
        Ok(())
    }

    async fn handle_event(&self, mut event: Event, parent: &Cancellation) {
        self.stats.event_dispatched();
        let handlers = self.registry.resolve(&event);
        if handlers.is_empty() {
            debug!("No handler for {}", event.type_name());
        }

        let abort = event.abort_flag();
        for handler in handlers {
            if abort.is_set() {
                debug!("{} aborted early, skipping remaining handlers", event.type_name());
                break;
            }
            self.stats.handler_invoked();
            if let Err(err) = self.executor.execute(&handler, parent, abort.clone()).await {
                self.stats.handler_failed(&err);
                warn!(
                    handler = err.handler(),
                    event = event.type_name(),
                    "Event handler failed: {}",
                    err
                );
            }
        }

        for callback in event.take_callbacks() {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&event)));
            if outcome.is_err() {
                self.stats.callback_panicked();
                error!("Completion callback for {} panicked", event.type_name());
            }
        }
    }

    /// Asks the loop to drain and terminate, and waits until it has.
    ///
    /// `cancellation` becomes the parent context of every handler invoked
    /// during the drain and of the `Shutdown` dispatch. Only the first call is
    /// served; later calls fail with [`BrainError::AlreadyShuttingDown`].
    #[instrument(skip_all)]
    pub async fn shutdown(&self, cancellation: Cancellation) -> BrainResult<()> {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return Err(BrainError::AlreadyShuttingDown);
        }

        let (ack, done) = oneshot::channel();
        self.shutdown_tx
            .send(ShutdownRequest { cancellation, ack })
            .await
            .map_err(|_| BrainError::ShutdownAborted)?;
        done.await.map_err(|_| BrainError::ShutdownAborted)?;

        info!("Brain terminated");
        Ok(())
    }
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("state", &self.state())
            .field("pending_events", &self.pending_events())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
