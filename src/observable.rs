//! The subscription protocol shared by emitters, values and promises, plus
//! the derived views built on top of it.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, OnceLock, Weak},
};

use parking_lot::Mutex;

use crate::{
    context::{immediate, shared, ExecutionContext, SharedContext},
    registry::{schedule, Callback, Observer},
    Promise,
};

/// A source of payloads that observers can subscribe to.
pub trait Observable: Send + Sync {
    type Payload: Clone + Send + 'static;

    /// Registers `callback` to be run on `context` for each payload.
    fn subscribe(&self, context: SharedContext, callback: Callback<Self::Payload>) -> Observer;

    /// Ignores observers that don't belong to this observable.
    fn remove(&self, observer: &Observer);
}

/// Convenience methods for every [`Observable`].
pub trait ObservableExt: Observable {
    /// Observes on the notifying thread.
    fn observe(&self, callback: impl Fn(Self::Payload) + Send + Sync + 'static) -> Observer {
        self.subscribe(immediate(), Arc::new(callback))
    }

    fn observe_on(
        &self,
        context: impl ExecutionContext + 'static,
        callback: impl Fn(Self::Payload) + Send + Sync + 'static,
    ) -> Observer {
        self.subscribe(shared(context), Arc::new(callback))
    }

    /// Observes only while `owner` is alive. The first payload to arrive
    /// after the owner is gone removes the subscription instead.
    fn observe_weak<O>(
        &self,
        owner: &Arc<O>,
        callback: impl Fn(&O, Self::Payload) + Send + Sync + 'static,
    ) -> Observer
    where
        O: Send + Sync + 'static,
    {
        let owner: Weak<O> = Arc::downgrade(owner);
        let slot = Arc::new(OnceLock::<Observer>::new());
        let observer = self.observe({
            let slot = Arc::clone(&slot);
            move |payload| match owner.upgrade() {
                Some(owner) => callback(&owner, payload),
                None => {
                    if let Some(observer) = slot.get() {
                        observer.remove()
                    }
                }
            }
        });
        let _ = slot.set(observer.clone());
        observer
    }

    /// Derived view that transforms each payload and drops the `None`s.
    fn filter_map<N, F>(&self, transform: F) -> AnyObservable<N>
    where
        Self: Clone + Sized + 'static,
        N: Clone + Send + 'static,
        F: Fn(Self::Payload) -> Option<N> + Send + Sync + 'static,
    {
        let source = self.clone();
        let transform = Arc::new(transform);
        AnyObservable::from_fns(
            {
                let source = source.clone();
                move |context, callback: Callback<N>| {
                    let transform = Arc::clone(&transform);
                    source.subscribe(
                        context,
                        Arc::new(move |payload: Self::Payload| {
                            if let Some(next) = transform(payload) {
                                callback(next)
                            }
                        }),
                    )
                }
            },
            move |observer| source.remove(observer),
        )
    }

    fn map<N, F>(&self, transform: F) -> AnyObservable<N>
    where
        Self: Clone + Sized + 'static,
        N: Clone + Send + 'static,
        F: Fn(Self::Payload) -> N + Send + Sync + 'static,
    {
        self.filter_map(move |payload| Some(transform(payload)))
    }

    fn filter<F>(&self, predicate: F) -> AnyObservable<Self::Payload>
    where
        Self: Clone + Sized + 'static,
        F: Fn(&Self::Payload) -> bool + Send + Sync + 'static,
    {
        self.filter_map(move |payload| predicate(&payload).then_some(payload))
    }

    /// Derived view that skips payloads equal to the one delivered just
    /// before. Each subscription compares against its own history.
    fn distinct_until_changed(&self) -> AnyObservable<Self::Payload>
    where
        Self: Clone + Sized + 'static,
        Self::Payload: PartialEq,
    {
        let source = self.clone();
        AnyObservable::from_fns(
            {
                let source = source.clone();
                move |context, callback: Callback<Self::Payload>| {
                    let last = Mutex::new(None::<Self::Payload>);
                    source.subscribe(
                        context,
                        Arc::new(move |payload: Self::Payload| {
                            let changed = {
                                let mut last = last.lock();
                                let changed = last.as_ref() != Some(&payload);
                                if changed {
                                    *last = Some(payload.clone());
                                }
                                changed
                            };
                            if changed {
                                callback(payload)
                            }
                        }),
                    )
                }
            },
            move |observer| source.remove(observer),
        )
    }

    fn as_unit(&self) -> AnyObservable<()>
    where
        Self: Clone + Sized + 'static,
    {
        self.map(|_| ())
    }

    /// Fulfills with the next payload, then unsubscribes.
    ///
    /// For an [`ObservableValue`](crate::ObservableValue), that's the current
    /// value.
    fn once(&self) -> Promise<Self::Payload>
    where
        Self: Sized,
    {
        let promise = Promise::new();
        let observer = self.observe({
            let promise = promise.clone();
            move |payload| {
                promise.fulfill(payload);
            }
        });
        promise.always(move || observer.remove());
        promise
    }

    fn boxed(&self) -> AnyObservable<Self::Payload>
    where
        Self: Clone + Sized + 'static,
    {
        AnyObservable::new(self.clone())
    }
}

impl<O: Observable + ?Sized> ObservableExt for O {}

type SubscribeFn<P> = dyn Fn(SharedContext, Callback<P>) -> Observer + Send + Sync;
type RemoveFn = dyn Fn(&Observer) + Send + Sync;

/// Type-erased [`Observable`].
///
/// Holds the two halves of the protocol as closures over the wrapped
/// source, which it keeps alive.
pub struct AnyObservable<P> {
    subscribe: Arc<SubscribeFn<P>>,
    remove: Arc<RemoveFn>,
}

impl<P> Clone for AnyObservable<P> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
            remove: Arc::clone(&self.remove),
        }
    }
}

impl<P> Debug for AnyObservable<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyObservable").finish_non_exhaustive()
    }
}

impl<P: Clone + Send + 'static> AnyObservable<P> {
    pub fn new<O>(source: O) -> Self
    where
        O: Observable<Payload = P> + 'static,
    {
        let source = Arc::new(source);
        let remover = Arc::clone(&source);
        Self::from_fns(
            move |context, callback| source.subscribe(context, callback),
            move |observer| remover.remove(observer),
        )
    }

    pub fn from_fns(
        subscribe: impl Fn(SharedContext, Callback<P>) -> Observer + Send + Sync + 'static,
        remove: impl Fn(&Observer) + Send + Sync + 'static,
    ) -> Self {
        Self {
            subscribe: Arc::new(subscribe),
            remove: Arc::new(remove),
        }
    }
}

impl<P: Clone + Send + 'static> Observable for AnyObservable<P> {
    type Payload = P;

    fn subscribe(&self, context: SharedContext, callback: Callback<P>) -> Observer {
        (self.subscribe)(context, callback)
    }

    fn remove(&self, observer: &Observer) {
        (self.remove)(observer)
    }
}

/// Pairs up the latest payloads of two observables.
///
/// Nothing is emitted until both sides have produced a value; after that,
/// each payload from either side is emitted together with the other side's
/// latest one. Pairs are delivered on the subscriber's context, and removing
/// the returned observer removes both upstream subscriptions.
pub fn zip<A, B>(lhs: A, rhs: B) -> AnyObservable<(A::Payload, B::Payload)>
where
    A: Observable + Clone + 'static,
    B: Observable + Clone + 'static,
{
    AnyObservable::from_fns(
        move |context, callback| {
            let latest = Arc::new(Mutex::new((None, None)));
            let left = lhs.subscribe(immediate(), {
                let (latest, context, callback) =
                    (latest.clone(), context.clone(), callback.clone());
                Arc::new(move |a: A::Payload| {
                    let pair = {
                        let mut latest = latest.lock();
                        latest.0 = Some(a.clone());
                        latest.1.clone().map(|b| (a, b))
                    };
                    if let Some(pair) = pair {
                        schedule(&context, &callback, pair);
                    }
                })
            });
            let right = rhs.subscribe(immediate(), {
                Arc::new(move |b: B::Payload| {
                    let pair = {
                        let mut latest = latest.lock();
                        latest.1 = Some(b.clone());
                        latest.0.clone().map(|a| (a, b))
                    };
                    if let Some(pair) = pair {
                        schedule(&context, &callback, pair);
                    }
                })
            });
            Observer::pair(left, right)
        },
        Observer::remove,
    )
}
