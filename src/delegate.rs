use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use crate::{
    context::{immediate, shared, ExecutionContext, SharedContext},
    registry::{Observer, ObserverRegistry},
    Promise,
};

/// Fans a payload out to handlers that answer asynchronously, and gathers
/// their answers.
///
/// Each handler gets a copy of the payload on its own context. The answers
/// come back in registration order.
///
/// # Examples
///
/// ```
/// use promise_kit::Delegate;
///
/// let should_close = Delegate::<&str, bool>::new();
/// should_close.observe(|window| window != "editor");
/// should_close.observe(|_| true);
/// assert_eq!(should_close.emit("editor").value(), Some(vec![false, true]));
/// ```
pub struct Delegate<P, R> {
    registry: ObserverRegistry<(P, Promise<R>)>,
}

impl<P, R> Clone for Delegate<P, R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<P, R> Debug for Delegate<P, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Delegate").field(&self.registry).finish()
    }
}

impl<P: Clone + Send + 'static, R: Clone + Send + 'static> Default for Delegate<P, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send + 'static, R: Clone + Send + 'static> Delegate<P, R> {
    pub fn new() -> Self {
        Self {
            registry: ObserverRegistry::new(),
        }
    }

    pub fn observe(&self, handler: impl Fn(P) -> R + Send + Sync + 'static) -> Observer {
        self.observe_async(move |payload| Promise::fulfilled(handler(payload)))
    }

    pub fn observe_async(
        &self,
        handler: impl Fn(P) -> Promise<R> + Send + Sync + 'static,
    ) -> Observer {
        self.observe_shared(immediate(), handler)
    }

    pub fn observe_async_on(
        &self,
        context: impl ExecutionContext + 'static,
        handler: impl Fn(P) -> Promise<R> + Send + Sync + 'static,
    ) -> Observer {
        self.observe_shared(shared(context), handler)
    }

    fn observe_shared(
        &self,
        context: SharedContext,
        handler: impl Fn(P) -> Promise<R> + Send + Sync + 'static,
    ) -> Observer {
        self.registry.add_shared(
            context,
            Arc::new(move |(payload, reply): (P, Promise<R>)| handler(payload).forward_to(reply)),
        )
    }

    /// Calls every handler registered right now and fulfills with their
    /// answers once all of them have. The first failing handler rejects the
    /// result.
    ///
    /// With no handlers, fulfills right away with an empty list.
    pub fn emit(&self, payload: P) -> Promise<Vec<R>> {
        let replies: Vec<_> = self
            .registry
            .snapshot()
            .iter()
            .map(|entry| {
                let reply = Promise::new();
                entry.deliver((payload.clone(), reply.clone()));
                reply
            })
            .collect();
        Promise::all(replies)
    }

    /// Unknown or already removed observers are ignored.
    pub fn remove(&self, observer: &Observer) {
        self.registry.remove(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }
}
