use std::fmt::{self, Debug, Formatter};

use crate::{
    context::SharedContext,
    observable::Observable,
    registry::{Callback, Observer, ObserverRegistry},
};

/// Broadcasts each emitted payload to its current observers.
///
/// Nothing is buffered: observers added after an emission don't see it.
///
/// # Examples
///
/// ```
/// use promise_kit::{EventEmitter, ObservableExt};
///
/// let clicks = EventEmitter::<u32>::new();
/// let next = clicks.once();
/// clicks.emit(3);
/// assert_eq!(next.value(), Some(3));
/// ```
pub struct EventEmitter<P> {
    registry: ObserverRegistry<P>,
}

impl<P> Clone for EventEmitter<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<P> Debug for EventEmitter<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventEmitter").field(&self.registry).finish()
    }
}

impl<P: Clone + Send + 'static> Default for EventEmitter<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send + 'static> EventEmitter<P> {
    pub fn new() -> Self {
        Self {
            registry: ObserverRegistry::new(),
        }
    }

    pub fn emit(&self, payload: P) {
        self.registry.broadcast(payload)
    }

    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }
}

impl EventEmitter<()> {
    pub fn notify(&self) {
        self.emit(())
    }
}

impl<P: Clone + Send + 'static> Observable for EventEmitter<P> {
    type Payload = P;

    fn subscribe(&self, context: SharedContext, callback: Callback<P>) -> Observer {
        self.registry.add_shared(context, callback)
    }

    fn remove(&self, observer: &Observer) {
        self.registry.remove(observer)
    }
}
