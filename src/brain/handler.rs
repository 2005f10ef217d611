//! Handler shapes accepted by the brain.
//!
//! A handler is any function or closure taking one payload argument, optionally
//! preceded by a [`HandlerContext`], and returning either `()` or
//! `Result<(), E>` for an error type convertible into [`BoxError`]. Sync
//! handlers go through [`Handler`], async ones through [`AsyncHandler`].
//!
//! Arity, context position, and return shape are checked by the compiler; the
//! remaining runtime checks (reference or type-erased payloads) happen in the
//! registry.
//!
//! The payload argument selects what the handler receives. A concrete type
//! `E` matches events whose payload is exactly `E`. An `Arc<dyn Capability>`
//! matches every payload type declared to satisfy `Capability`.

use std::{
    any::{type_name, TypeId},
    future::Future,
    marker::PhantomData,
    sync::Arc,
};

use futures::future::{BoxFuture, FutureExt};

use super::{
    context::HandlerContext,
    error::{BoxError, HandlerError, HandlerResult},
    event::Payload,
};

/// Return values a handler may produce.
pub trait HandlerOutput: Send + 'static {
    const RETURNS_ERROR: bool;

    fn into_result(self) -> Result<(), BoxError>;
}

impl HandlerOutput for () {
    const RETURNS_ERROR: bool = false;

    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> HandlerOutput for Result<(), E>
where
    E: Into<BoxError> + Send + 'static,
{
    const RETURNS_ERROR: bool = true;

    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Marker for handlers shaped `Fn(A)`.
pub struct PayloadOnly<A>(PhantomData<fn(A)>);

/// Marker for handlers shaped `Fn(HandlerContext, A)`.
pub struct WithContext<A>(PhantomData<fn(A)>);

pub trait Handler<M>: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;
    type Output: HandlerOutput;
    const ACCEPTS_CONTEXT: bool;

    fn call(&self, ctx: HandlerContext, payload: Self::Payload) -> Self::Output;
}

impl<F, A, R> Handler<PayloadOnly<A>> for F
where
    F: Fn(A) -> R + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    R: HandlerOutput,
{
    type Payload = A;
    type Output = R;
    const ACCEPTS_CONTEXT: bool = false;

    fn call(&self, _ctx: HandlerContext, payload: A) -> R {
        self(payload)
    }
}

impl<F, A, R> Handler<WithContext<A>> for F
where
    F: Fn(HandlerContext, A) -> R + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    R: HandlerOutput,
{
    type Payload = A;
    type Output = R;
    const ACCEPTS_CONTEXT: bool = true;

    fn call(&self, ctx: HandlerContext, payload: A) -> R {
        self(ctx, payload)
    }
}

pub trait AsyncHandler<M>: Send + Sync + 'static {
    type Payload: Clone + Send + Sync + 'static;
    type Output: HandlerOutput;
    type Future: Future<Output = Self::Output> + Send + 'static;
    const ACCEPTS_CONTEXT: bool;

    fn call(&self, ctx: HandlerContext, payload: Self::Payload) -> Self::Future;
}

impl<F, A, Fut> AsyncHandler<PayloadOnly<A>> for F
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    type Payload = A;
    type Output = Fut::Output;
    type Future = Fut;
    const ACCEPTS_CONTEXT: bool = false;

    fn call(&self, _ctx: HandlerContext, payload: A) -> Fut {
        self(payload)
    }
}

impl<F, A, Fut> AsyncHandler<WithContext<A>> for F
where
    F: Fn(HandlerContext, A) -> Fut + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    type Payload = A;
    type Output = Fut::Output;
    type Future = Fut;
    const ACCEPTS_CONTEXT: bool = true;

    fn call(&self, ctx: HandlerContext, payload: A) -> Fut {
        self(ctx, payload)
    }
}

pub(crate) type BlockingInvoke =
    Arc<dyn Fn(HandlerContext, Payload) -> HandlerResult + Send + Sync>;
pub(crate) type AsyncInvoke =
    Arc<dyn Fn(HandlerContext, Payload) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// How the executor runs the handler: on the blocking pool or as a task.
#[derive(Clone)]
pub(crate) enum Invoke {
    Blocking(BlockingInvoke),
    Async(AsyncInvoke),
}

/// Immutable description of one registered handler.
pub struct HandlerDescriptor {
    pub(crate) event_type: TypeId,
    pub(crate) event_type_name: &'static str,
    pub(crate) name: &'static str,
    pub(crate) accepts_context: bool,
    pub(crate) returns_error: bool,
    /// Global registration order, assigned by the registry.
    pub(crate) seq: u64,
    pub(crate) invoke: Invoke,
}

impl HandlerDescriptor {
    pub(crate) fn blocking<M, H>(handler: H) -> Self
    where
        M: 'static,
        H: Handler<M>,
    {
        let name = type_name::<H>();
        let invoke: BlockingInvoke = Arc::new(move |ctx, payload| {
            let payload = downcast_payload::<H::Payload>(&payload, name)?;
            handler
                .call(ctx, payload)
                .into_result()
                .map_err(|source| HandlerError::Failed {
                    handler: name,
                    source,
                })
        });

        Self {
            event_type: TypeId::of::<H::Payload>(),
            event_type_name: type_name::<H::Payload>(),
            name,
            accepts_context: H::ACCEPTS_CONTEXT,
            returns_error: <H::Output as HandlerOutput>::RETURNS_ERROR,
            seq: 0,
            invoke: Invoke::Blocking(invoke),
        }
    }

    pub(crate) fn asynchronous<M, H>(handler: H) -> Self
    where
        M: 'static,
        H: AsyncHandler<M>,
    {
        let name = type_name::<H>();
        let invoke: AsyncInvoke = Arc::new(move |ctx, payload| {
            let payload = match downcast_payload::<H::Payload>(&payload, name) {
                Ok(payload) => payload,
                Err(err) => return futures::future::ready(Err(err)).boxed(),
            };
            let future = handler.call(ctx, payload);
            async move {
                future
                    .await
                    .into_result()
                    .map_err(|source| HandlerError::Failed {
                        handler: name,
                        source,
                    })
            }
            .boxed()
        });

        Self {
            event_type: TypeId::of::<H::Payload>(),
            event_type_name: type_name::<H::Payload>(),
            name,
            accepts_context: H::ACCEPTS_CONTEXT,
            returns_error: <H::Output as HandlerOutput>::RETURNS_ERROR,
            seq: 0,
            invoke: Invoke::Async(invoke),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn event_type(&self) -> TypeId {
        self.event_type
    }

    pub fn event_type_name(&self) -> &'static str {
        self.event_type_name
    }

    pub fn accepts_context(&self) -> bool {
        self.accepts_context
    }

    pub fn returns_error(&self) -> bool {
        self.returns_error
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("event_type", &self.event_type_name)
            .field("accepts_context", &self.accepts_context)
            .field("returns_error", &self.returns_error)
            .field("seq", &self.seq)
            .finish()
    }
}

fn downcast_payload<A>(payload: &Payload, handler: &'static str) -> Result<A, HandlerError>
where
    A: Clone + 'static,
{
    payload
        .downcast_ref::<A>()
        .cloned()
        .ok_or(HandlerError::PayloadMismatch {
            handler,
            expected: type_name::<A>(),
        })
}
