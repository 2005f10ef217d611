use std::{
    any::{Any, TypeId},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Type-erased event payload shared between the loop and handler tasks.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Runs synchronously on the loop after every handler for the event finished
/// (or the sequence was aborted).
pub type Callback = Box<dyn FnOnce(&Event) + Send + 'static>;

/// Per-event abort flag. Handlers run on their own tasks, so the flag is shared.
#[derive(Clone, Default, Debug)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// # Event
///
/// The envelope the brain moves through its queue: an arbitrary payload, the
/// completion callbacks registered by the producer, and the early-abort flag
/// that handlers of this event may raise.
///
/// ```rust,no_run
/// # use botty::brain::Event;
/// #[derive(Clone)]
/// struct Greeting;
///
/// let event = Event::new(Greeting).on_complete(|evt| {
///     println!("{} handled, aborted: {}", evt.type_name(), evt.is_aborted());
/// });
/// ```
pub struct Event {
    payload: Payload,
    type_id: TypeId,
    type_name: &'static str,
    callbacks: Vec<Callback>,
    abort: AbortFlag,
}

impl Event {
    pub fn new<E: Any + Send + Sync>(payload: E) -> Self {
        Self {
            payload: Arc::new(payload),
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            callbacks: Vec::new(),
            abort: AbortFlag::default(),
        }
    }

    /// Appends a completion callback. Callbacks run in the order they were added.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn payload<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    pub fn payload_type(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Skips the remaining handlers for this event only.
    pub fn abort_early(&self) {
        self.abort.set();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_set()
    }

    pub(crate) fn shared_payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub(crate) fn take_callbacks(&mut self) -> Vec<Callback> {
        std::mem::take(&mut self.callbacks)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("type", &self.type_name)
            .field("callbacks", &self.callbacks.len())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
