//! # Brain
//!
//! Typed in-process publish/subscribe. Producers [`Brain::emit`] arbitrary
//! payloads; handlers are plain functions or closures whose payload argument
//! type decides which events they receive.
//!
//! ## Matching
//! - Exact: a handler taking `Greeting` receives every `Greeting` payload.
//! - Capability: after `brain.declare_capability::<Greeting, dyn Polite, _>(|g| g)`,
//!   a handler taking `Arc<dyn Polite>` receives every `Greeting` too.
//!
//! Exact-type handlers always run before capability handlers; within each
//! class handlers run in registration order.
//!
//! ## Failure isolation
//! Handler errors, panics, and timeouts are logged and counted in
//! [`BrainStats`]; none of them stop the loop or skip sibling handlers. Only
//! [`HandlerContext::abort_early`] skips the remaining handlers of one event.
//!
//! ## Shutdown
//! [`Brain::shutdown`] is a two-phase drain: intake closes, queued events are
//! still delivered, `ShutdownEvent` is dispatched, then the call returns.

mod context;
mod dispatcher;
mod error;
mod event;
mod events;
mod executor;
mod handler;
mod queue;
mod registry;
mod stats;

pub use context::{CancelReason, Cancellation, HandlerContext};
pub use dispatcher::{Brain, BrainState};
pub use error::{
    BoxError, BrainError, BrainResult, HandlerError, HandlerResult, RegistrationError,
    RegistrationErrors,
};
pub use event::{AbortFlag, Callback, Event, Payload};
pub use events::{InitEvent, ReceiveMessageEvent, ShutdownEvent};
pub use executor::{HandlerExecutor, DEFAULT_HANDLER_TIMEOUT};
pub use handler::{
    AsyncHandler, Handler, HandlerDescriptor, HandlerOutput, PayloadOnly, WithContext,
};
pub use queue::{event_queue, EventReceiver, EventSender};
pub use registry::{HandlerRegistry, ResolvedHandler};
pub use stats::BrainStats;
