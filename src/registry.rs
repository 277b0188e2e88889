//! Observer bookkeeping shared by every observable in this crate.
//!
//! The subject owns its callbacks; an [`Observer`] handle only holds a token
//! and a weak reference back to the subject, so handles never keep a subject
//! (or its callbacks) alive and removing through a stale handle is a no-op.

use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    mem,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::context::{shared, ExecutionContext, SharedContext};

/// Shared form of an observer callback.
pub type Callback<P> = Arc<dyn Fn(P) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Token(u64);

/// Implemented by anything that hands out registered [`Observer`]s.
pub(crate) trait Unregister: Send + Sync {
    fn unregister(&self, token: Token);
}

pub(crate) fn schedule<P: Send + 'static>(
    context: &SharedContext,
    callback: &Callback<P>,
    payload: P,
) {
    let callback = Arc::clone(callback);
    context.execute(Box::new(move || callback(payload)));
}

pub(crate) struct Entry<P> {
    token: Token,
    context: SharedContext,
    callback: Callback<P>,
}

impl<P: Send + 'static> Entry<P> {
    pub(crate) fn deliver(&self, payload: P) {
        schedule(&self.context, &self.callback, payload)
    }
}

/// Delivers one broadcast to a snapshot, in registration order.
///
/// Must be called without holding the lock the snapshot was taken under.
pub(crate) fn deliver_all<P: Clone + Send + 'static>(entries: &[Arc<Entry<P>>], payload: P) {
    trace!(observers = entries.len(), "broadcast");
    if let Some((last, rest)) = entries.split_last() {
        for entry in rest {
            entry.deliver(payload.clone());
        }
        last.deliver(payload);
    }
}

/// Ordered observer list. Carries no lock of its own so that owners can keep
/// it under the same lock as the rest of their state.
pub(crate) struct Observers<P> {
    next_token: u64,
    entries: Vec<Arc<Entry<P>>>,
}

impl<P> Observers<P> {
    pub(crate) const fn new() -> Self {
        Self {
            next_token: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, context: SharedContext, callback: Callback<P>) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.entries.push(Arc::new(Entry {
            token,
            context,
            callback,
        }));
        token
    }

    pub(crate) fn remove(&mut self, token: Token) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.token != token);
        self.entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Entry<P>>> {
        self.entries.clone()
    }

    /// Empties the list, releasing the callbacks once the returned snapshot
    /// has been delivered to.
    pub(crate) fn take(&mut self) -> Vec<Arc<Entry<P>>> {
        mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

enum Link {
    Registered {
        token: Token,
        target: Weak<dyn Unregister>,
    },
    Pair(Observer, Observer),
    /// Its single delivery was scheduled on subscription; nothing to remove.
    Settled,
}

/// Handle to a live subscription.
///
/// Clones refer to the same subscription and compare equal. Dropping a handle
/// does **not** unsubscribe; call [`remove`](Observer::remove), or keep it in
/// an [`ObserverBag`](crate::ObserverBag).
#[derive(Clone)]
pub struct Observer {
    link: Arc<Link>,
}

impl Observer {
    pub(crate) fn registered(token: Token, target: Weak<dyn Unregister>) -> Self {
        Self {
            link: Arc::new(Link::Registered { token, target }),
        }
    }

    pub(crate) fn pair(first: Observer, second: Observer) -> Self {
        Self {
            link: Arc::new(Link::Pair(first, second)),
        }
    }

    pub(crate) fn settled() -> Self {
        Self {
            link: Arc::new(Link::Settled),
        }
    }

    /// Stops further deliveries and releases the callback.
    ///
    /// A delivery already in flight from a concurrent broadcast may still
    /// arrive. Removing twice is fine.
    pub fn remove(&self) {
        match &*self.link {
            Link::Registered { token, target } => {
                if let Some(target) = target.upgrade() {
                    target.unregister(*token);
                }
            }
            Link::Pair(first, second) => {
                first.remove();
                second.remove();
            }
            Link::Settled => (),
        }
    }

    /// Removes this observer only if it was registered on `subject`.
    pub(crate) fn remove_from(&self, subject: *const ()) {
        match &*self.link {
            Link::Registered { token, target } => {
                if Weak::as_ptr(target).cast::<()>() == subject {
                    if let Some(target) = target.upgrade() {
                        target.unregister(*token);
                    }
                }
            }
            Link::Pair(first, second) => {
                first.remove_from(subject);
                second.remove_from(subject);
            }
            Link::Settled => (),
        }
    }
}

impl PartialEq for Observer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.link, &other.link)
    }
}

impl Eq for Observer {}

impl Hash for Observer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.link).hash(state)
    }
}

impl Debug for Observer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &*self.link {
            Link::Registered { token, target } => f
                .debug_struct("Observer")
                .field("token", &token.0)
                .field("attached", &(target.strong_count() > 0))
                .finish(),
            Link::Pair(first, second) => {
                f.debug_tuple("Observer").field(first).field(second).finish()
            }
            Link::Settled => f.write_str("Observer(settled)"),
        }
    }
}

struct RegistryInner<P> {
    observers: Mutex<Observers<P>>,
}

impl<P: Send> Unregister for RegistryInner<P> {
    fn unregister(&self, token: Token) {
        self.observers.lock().remove(token);
    }
}

/// Thread-safe, ordered set of callbacks for one subject.
///
/// [`broadcast`](ObserverRegistry::broadcast) snapshots the list under the
/// lock and delivers after releasing it, so callbacks may subscribe, remove
/// or broadcast again on the same registry. The flip side is that an
/// observer removed while a broadcast is in flight can still receive that
/// one payload.
pub struct ObserverRegistry<P> {
    inner: Arc<RegistryInner<P>>,
}

impl<P> Clone for ObserverRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Debug for ObserverRegistry<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.inner.observers.lock().len())
            .finish()
    }
}

impl<P: Clone + Send + 'static> Default for ObserverRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send + 'static> ObserverRegistry<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                observers: Mutex::new(Observers::new()),
            }),
        }
    }

    pub fn add(
        &self,
        context: impl ExecutionContext + 'static,
        callback: impl Fn(P) + Send + Sync + 'static,
    ) -> Observer {
        self.add_shared(shared(context), Arc::new(callback))
    }

    pub(crate) fn add_shared(&self, context: SharedContext, callback: Callback<P>) -> Observer {
        let token = self.inner.observers.lock().insert(context, callback);
        let weak = Arc::downgrade(&self.inner);
        let target: Weak<dyn Unregister> = weak;
        Observer::registered(token, target)
    }

    /// Unknown or already removed observers are ignored.
    pub fn remove(&self, observer: &Observer) {
        observer.remove_from(self.id());
    }

    pub fn broadcast(&self, payload: P) {
        deliver_all(&self.snapshot(), payload);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Entry<P>>> {
        self.inner.observers.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn id(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast()
    }
}
