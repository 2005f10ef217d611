use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use tracing::debug;

use super::{
    error::RegistrationError,
    event::{Event, Payload},
    handler::HandlerDescriptor,
};

type Cast = Arc<dyn Fn(&Payload) -> Option<Payload> + Send + Sync>;

const POINTER_PREFIXES: [&str; 6] = [
    "alloc::sync::Arc<",
    "alloc::boxed::Box<",
    "alloc::rc::Rc<",
    "std::sync::Arc<",
    "std::boxed::Box<",
    "std::rc::Rc<",
];

/// Payloads are emitted by value, so a handler taking a smart pointer to a
/// concrete type would never fire. `Arc<dyn C>` is the capability view and
/// stays allowed.
fn is_pointer_payload(type_name: &str) -> bool {
    POINTER_PREFIXES.iter().any(|prefix| match type_name.strip_prefix(prefix) {
        Some(inner) => !(prefix.ends_with("Arc<") && inner.starts_with("dyn ")),
        None => false,
    })
}

/// Declares that payload type `E` satisfies the capability whose handlers are
/// keyed by `capability` (the `TypeId` of `Arc<dyn Capability>`).
#[derive(Clone)]
struct CapabilityBinding {
    capability: TypeId,
    capability_name: &'static str,
    cast: Cast,
}

#[derive(Default)]
struct Inner {
    handlers: HashMap<TypeId, Vec<Arc<HandlerDescriptor>>>,
    capabilities: HashMap<TypeId, Vec<CapabilityBinding>>,
}

/// A handler matched for one event, with the payload shaped the way the
/// handler expects it (the event's own payload, or its capability view).
#[derive(Clone)]
pub struct ResolvedHandler {
    pub descriptor: Arc<HandlerDescriptor>,
    pub payload: Payload,
}

impl std::fmt::Debug for ResolvedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Payload type to handler list mapping.
///
/// Reads happen on every dispatch and writes only while collaborators
/// register, so the maps sit behind a read/write lock. Descriptors are
/// append-only.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<Inner>,
    sequence: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mut descriptor: HandlerDescriptor) -> Result<(), RegistrationError> {
        Self::validate(&descriptor)?;
        descriptor.seq = self.sequence.fetch_add(1, Ordering::SeqCst);

        debug!(
            "Register handler {} for {}",
            descriptor.name, descriptor.event_type_name
        );
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .handlers
            .entry(descriptor.event_type)
            .or_default()
            .push(Arc::new(descriptor));
        Ok(())
    }

    fn validate(descriptor: &HandlerDescriptor) -> Result<(), RegistrationError> {
        if descriptor.event_type_name.starts_with('&') {
            return Err(RegistrationError::ReferencePayload {
                payload: descriptor.event_type_name,
            });
        }
        if is_pointer_payload(descriptor.event_type_name) {
            return Err(RegistrationError::PointerPayload {
                payload: descriptor.event_type_name,
            });
        }
        if descriptor.event_type == TypeId::of::<Payload>() {
            return Err(RegistrationError::ErasedPayload {
                payload: descriptor.event_type_name,
            });
        }
        Ok(())
    }

    /// Makes every `E` payload visible to handlers taking `Arc<C>`.
    ///
    /// Matching is by exact type: a handler taking `Arc<dyn C + Send + Sync>`
    /// does not see a view declared as `dyn C`. Declare the capability with
    /// the same trait object type the handlers name.
    pub fn declare_capability<E, C, F>(&self, cast: F) -> Result<(), RegistrationError>
    where
        E: Any + Send + Sync,
        C: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<E>) -> Arc<C> + Send + Sync + 'static,
    {
        let capability = TypeId::of::<Arc<C>>();
        let erased: Cast = Arc::new(move |payload: &Payload| {
            let concrete = payload.clone().downcast::<E>().ok()?;
            Some(Arc::new(cast(concrete)) as Payload)
        });

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let bindings = inner.capabilities.entry(TypeId::of::<E>()).or_default();
        if bindings.iter().any(|b| b.capability == capability) {
            return Err(RegistrationError::DuplicateCapability {
                payload: type_name::<E>(),
                capability: type_name::<C>(),
            });
        }
        debug!("Declare {} as {}", type_name::<E>(), type_name::<C>());
        bindings.push(CapabilityBinding {
            capability,
            capability_name: type_name::<C>(),
            cast: erased,
        });
        Ok(())
    }

    /// Handlers matching the event's runtime type: exact-type handlers in
    /// registration order, then capability handlers in registration order.
    pub fn resolve(&self, event: &Event) -> Vec<ResolvedHandler> {
        let (exact, bindings) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let exact = inner
                .handlers
                .get(&event.payload_type())
                .cloned()
                .unwrap_or_default();
            let bindings: Vec<(CapabilityBinding, Vec<Arc<HandlerDescriptor>>)> = inner
                .capabilities
                .get(&event.payload_type())
                .into_iter()
                .flatten()
                .filter_map(|binding| {
                    let handlers = inner.handlers.get(&binding.capability)?;
                    Some((binding.clone(), handlers.clone()))
                })
                .collect();
            (exact, bindings)
        };

        let payload = event.shared_payload();
        let mut resolved: Vec<ResolvedHandler> = exact
            .into_iter()
            .map(|descriptor| ResolvedHandler {
                descriptor,
                payload: payload.clone(),
            })
            .collect();

        let mut by_capability = Vec::new();
        for (binding, handlers) in bindings {
            let Some(view) = (binding.cast)(payload) else {
                debug!(
                    "Payload {} could not be viewed as {}",
                    event.type_name(),
                    binding.capability_name
                );
                continue;
            };
            by_capability.extend(handlers.into_iter().map(|descriptor| ResolvedHandler {
                descriptor,
                payload: view.clone(),
            }));
        }
        by_capability.sort_by_key(|handler| handler.descriptor.seq);

        resolved.extend(by_capability);
        resolved
    }

    pub fn handler_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.handlers.values().map(Vec::len).sum()
    }
}
